/*
 * bidsio: load BIDS neuroimaging datasets into an in-memory model, select
 * subjects with a boolean filter language, and export a filtered subset to a
 * new directory tree that is still a valid BIDS dataset.
 */
pub mod core;
pub mod logging;
