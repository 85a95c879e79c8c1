use serde::{Deserialize, Serialize};

use super::model::EntityKind;
use crate::world::{EntityHandle, World};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorItem {
    pub name: String,
    pub cost: u32,
    #[serde(default = "default_stock")]
    pub stock: u32,
}

fn default_stock() -> u32 {
    u32::MAX
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorStock {
    items: Vec<VendorItem>,
}

impl VendorStock {
    pub fn new(items: Vec<VendorItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[VendorItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&VendorItem> {
        self.items.get(index)
    }

    fn take_one(&mut self, index: usize) {
        if let Some(item) = self.items.get_mut(index) {
            item.stock = item.stock.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PurchaseError {
    #[error("buyer is not a craft")]
    NotACraft,
    #[error("target is not a vendor")]
    NotAVendor,
    #[error("vendor has no item at index {0}")]
    NoSuchItem(usize),
    #[error("`{0}` is out of stock")]
    OutOfStock(String),
    #[error("item costs {cost} but buyer has {credits}")]
    InsufficientCredits { cost: u32, credits: u32 },
}

/// Moves one unit of `index` from the vendor to the buyer. Either both sides
/// change or neither does.
pub fn purchase(
    world: &mut World,
    buyer: EntityHandle,
    vendor: EntityHandle,
    index: usize,
) -> Result<VendorItem, PurchaseError> {
    let item = match world.get(vendor).map(|e| &e.kind) {
        Some(EntityKind::Vendor(stock)) => stock
            .item(index)
            .cloned()
            .ok_or(PurchaseError::NoSuchItem(index))?,
        _ => return Err(PurchaseError::NotAVendor),
    };
    if item.stock == 0 {
        return Err(PurchaseError::OutOfStock(item.name));
    }

    let craft = world
        .get_mut(buyer)
        .and_then(|e| e.craft_mut())
        .ok_or(PurchaseError::NotACraft)?;
    if craft.credits < item.cost {
        return Err(PurchaseError::InsufficientCredits {
            cost: item.cost,
            credits: craft.credits,
        });
    }
    craft.credits -= item.cost;
    craft.cargo.push(item.name.clone());

    if let Some(EntityKind::Vendor(stock)) = world.get_mut(vendor).map(|e| &mut e.kind) {
        stock.take_one(index);
    }

    Ok(item)
}
