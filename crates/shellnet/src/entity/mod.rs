mod blueprint;
mod model;
mod vendor;

pub use blueprint::{AbilitySpec, Blueprint, BlueprintKind, BlueprintRegistry, PartSpec};
pub use model::{Ability, CraftState, Entity, EntityKind, Health, Part};
pub use vendor::{PurchaseError, VendorItem, VendorStock, purchase};
