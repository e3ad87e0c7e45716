pub mod helpers;
mod tests_graphs_temporal;
mod tests_paths;
mod tests_select;
mod tests_update;
