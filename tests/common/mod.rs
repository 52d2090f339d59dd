pub(crate) mod cluster;

pub(crate) mod logging;

pub(crate) mod memory_ledger;

pub(crate) mod network;
