//! Built-in phases of the tier pipeline.
//!
//! | Phase | Tier | Effect |
//! |---|---|---|
//! | [`CanonicalizePhase`] | high, mid | canonicalization to fixpoint |
//! | [`InliningPhase`] | high | splices small direct callees |
//! | [`EscapeAnalysisPhase`] | high | scalar replacement of local allocations |
//! | [`DeadCodeEliminationPhase`] | high, low | removes unreachable control flow and dead data |
//! | [`LoweringPhase`] | mid | field accesses become offset based reads and writes |
//! | [`GuardEliminationPhase`] | mid | removes repeated fixed guards |
//! | [`FloatingReadsPhase`] | mid | read-only reads float, anchored at their location |
//! | [`GuardLoweringPhase`] | low | guards become branches to deoptimization |
//! | [`StrengthReductionPhase`] | low | multiplications by powers of two become shifts |
//! | [`AddressLoweringPhase`] | low | large displacements become explicit addresses |

mod address;
mod canonicalize;
mod deadcode;
mod escape;
mod guards;
mod inlining;
mod lowering;
mod reads;
mod strength;

pub use address::AddressLoweringPhase;
pub use canonicalize::CanonicalizePhase;
pub use deadcode::DeadCodeEliminationPhase;
pub use escape::{virtualize_allocations, EscapeAnalysisPhase};
pub use guards::{GuardEliminationPhase, GuardLoweringPhase};
pub use inlining::InliningPhase;
pub use lowering::LoweringPhase;
pub use reads::FloatingReadsPhase;
pub use strength::StrengthReductionPhase;

use crate::{ir::Graph, ir::NodeKind, Result};

/// Fails if a field access survived lowering.
fn ensure_lowered(graph: &Graph) -> Result<()> {
    for id in graph.nodes() {
        if matches!(
            graph.kind(id),
            NodeKind::LoadField { .. } | NodeKind::StoreField { .. }
        ) {
            return Err(internal_fault!(
                node = id,
                "{} reached the low tier",
                graph.kind(id)
            ));
        }
    }
    Ok(())
}
