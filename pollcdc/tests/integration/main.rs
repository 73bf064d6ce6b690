mod cycle_test;
mod pipeline_test;
mod postgres_store_test;
