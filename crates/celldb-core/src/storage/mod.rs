pub mod cell_store;
