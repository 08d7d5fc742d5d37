#![forbid(unsafe_code)]

pub mod blend_cpu;
pub mod compose;
pub mod error;
pub mod handle;
pub mod model;
pub mod ops_cpu;
pub mod pipeline;
pub mod resolver;
pub mod transform;

pub use blend_cpu::blend;
pub use compose::{run, RunOutcome, RunSummary};
pub use error::{ComposerError, ComposerResult};
pub use handle::{JobEvent, JobHandle};
pub use model::{
    load_layer_stack, BlendMode, CompositeJob, LayerSpec, OutputFormat, SourceMode,
};
pub use resolver::{
    build_exact_map, build_fuzzy_map, common_keys, find_best_match, resolve_layers, KeyMap,
    ResolvedLayers,
};
pub use transform::{FlipDirection, TransformAction, TransformSpec};
