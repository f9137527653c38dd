//! hashfalld: cluster node running the cracking master or workers.

pub mod crack;
