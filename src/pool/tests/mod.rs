mod tests_pool;
mod tests_pruner;
