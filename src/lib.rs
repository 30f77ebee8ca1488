// Location records and validation
pub mod record;

// Document store collaborator interface
pub mod store;

// Identity resolution against the auth collaborator
pub mod identity;

// Position sampling and upsert loop
pub mod publisher;

// Snapshot + incremental event reconciliation
pub mod reconciler;

// Derived view projections (colors, listing, self-match)
pub mod view;

// Map marker lifecycle management
pub mod markers;

// Configuration loading
pub mod config;
