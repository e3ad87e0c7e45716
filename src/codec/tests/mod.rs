pub mod helpers;
mod tests_line_formats;
mod tests_rdfxml;
mod tests_roundtrip;
