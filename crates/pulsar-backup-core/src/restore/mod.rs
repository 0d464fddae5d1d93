//! Restore side: inventory recreation, message replay and purge.

pub mod inventory;
pub mod purge;
pub mod replay;

pub use inventory::InventoryRestorer;
pub use purge::ResourcePurger;
pub use replay::ReplayEngine;
