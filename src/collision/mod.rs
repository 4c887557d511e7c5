pub mod broadphase;
pub mod clipping;
pub mod contact;
pub mod filter;
pub mod manifold;
pub mod narrowphase;
pub mod queries;
