pub mod args;

pub use args::{Arguments, HistogramInput, OptionalFailurePolicy};

use clap::Parser;

pub fn parse() -> Arguments {
    Arguments::parse()
}
