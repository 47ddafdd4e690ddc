//! Automatic humanoid rigging.
//!
//! Repairs an untrusted mesh into a manifold surface, synthesizes a
//! Mixamo-named skeleton from body proportions, binds skin weights with a
//! heat-diffusion solver backed by a capsule-distance fallback, exports the
//! rig, and validates it against a library of extreme stress poses.

pub mod error;
pub mod logging;
pub mod mesh;
pub mod rig;
pub mod settings;
pub mod stress;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{RigError, Stage};
