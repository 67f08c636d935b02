pub mod carts;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod pricing;

pub use carts::CartService;
pub use inventory::InventoryService;
pub use orders::OrderService;
pub use payments::PaymentService;
