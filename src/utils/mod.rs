pub mod command;
pub mod fastq;
pub mod file;
pub mod metadata;
pub mod staging;
pub mod system;
