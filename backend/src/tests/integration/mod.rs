mod api;
mod pg_store;
