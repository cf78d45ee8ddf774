pub mod commitment_writer;
