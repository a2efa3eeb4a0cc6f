mod support;

mod ingest;
mod runner;
