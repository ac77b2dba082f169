pub use crate::RnnError;
pub use crate::config::{DType, DirectionMode, RnnAlgo, RnnConfig, RnnMode};
pub use crate::engine::{DataGradients, EngineForward, ReferenceEngine, RnnEngine};
pub use crate::init::{random_layer_params, random_sequence, random_stack_params, seeded_rng};
pub use crate::layout::{PackedLayout, ParamSlot, WeightLayout};
pub use crate::oracle::{
    ForwardTrace, Gradients, Recurrence, StackForward, StackGradients, stack_backward, stack_forward,
};
pub use crate::params::{GateParams, GateSide, GruGate, GruParams, LayerParams, LstmGate, LstmParams};
pub use crate::verification::{Tolerance, VerificationReport, Verifier, all_close};
