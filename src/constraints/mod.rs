pub mod atoms;
pub mod contact_rows;
pub mod joints;
pub mod molecule;
pub mod sidecars;
