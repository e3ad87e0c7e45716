mod tests_btree;
mod tests_orders;
