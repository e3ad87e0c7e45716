mod tests_update;
