//! Turns one dashboard submission into the next profile document.
//!
//! The HTML form posts repeated entities as parallel lists (`skill_name[i]`
//! pairs with `skill_icon[i]`). [`edit_batch_from_form`] is the only code that
//! knows about that layout; it produces an [`EditBatch`] of record objects,
//! and [`apply_edit`] reduces that batch onto the current document.

mod form;
mod reduce;

pub use folio_contracts::EditBatch;
pub use form::{FormFields, edit_batch_from_form, fields};
pub use reduce::{ImageUpload, apply_edit, apply_fields, submit_edit};
