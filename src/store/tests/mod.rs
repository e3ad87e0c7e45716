pub mod helpers;
mod tests_batch;
mod tests_locking;
mod tests_recovery;
