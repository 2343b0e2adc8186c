//! Build graph construction.
//!
//! Config components emit [`instruction::Instruction`]s per [`phase::Phase`].
//! Instructions compile into a [`target::Target`], which tracks the build
//! state and the image config of one variant.

pub mod graph;
pub mod image;
pub mod instruction;
pub mod macros;
pub mod options;
pub mod phase;
pub mod resolver;
pub mod target;


pub use graph::{Definition, Op, State};
pub use image::{Image, ImageConfig};
pub use instruction::Instruction;
pub use options::{Options, Platform};
pub use phase::{Phase, PhaseCompileable};
pub use resolver::{
    ImageMetaResolver, OfflineResolver, RegistryResolver, ResolvedImage, StaticResolver,
};
pub use target::{Target, TargetGroup};
