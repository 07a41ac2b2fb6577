mod engine;
mod worker;
