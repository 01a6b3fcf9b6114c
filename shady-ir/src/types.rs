//! Qualified types and the uniform/varying lattice.
//!
//! Grounded on `examples/original_source/include/shady/ir.h`'s
//! `DivergenceQualifier` enum (`Unknown | Uniform | Varying`). spec.md §3
//! describes `QualifiedType` as carrying a bare `is_uniform` bool, but the
//! original keeps a third, pre-inference "unknown" state; we keep that
//! third state (see SPEC_FULL.md's "Supplemented features") because
//! `shady-passes::infer` needs somewhere to put a qualifier before it has
//! enough information to commit to `Uniform` or `Varying`, and collapsing
//! that into `false` (varying) would make the post-inference verifier
//! unable to tell "proven varying" from "not yet analyzed".

use crate::entities::NodeId;

/// Whether a value is guaranteed bit-identical across every invocation in
/// a subgroup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Uniformity {
    /// Not yet determined; only legal before `shady-passes::infer` has run.
    Unknown,
    Uniform,
    Varying,
}

impl Uniformity {
    /// Meet of the lattice `Uniform < Varying` used when combining the
    /// uniformity of two operands that jointly determine a result's
    /// uniformity (spec.md §4.2: `add`'s result is `u_1 ∧ u_2`).
    ///
    /// `Unknown` is absorbing-pessimistic: combined with anything it stays
    /// `Unknown`, since we can't yet promise either bound.
    pub fn meet(self, other: Uniformity) -> Uniformity {
        use Uniformity::*;
        match (self, other) {
            (Unknown, _) | (_, Unknown) => Unknown,
            (Uniform, Uniform) => Uniform,
            _ => Varying,
        }
    }

    /// Is `self` a subtype of `other` in the uniform-is-a-subtype-of-varying
    /// lattice of spec.md §3?
    pub fn is_subtype(self, other: Uniformity) -> bool {
        use Uniformity::*;
        match (self, other) {
            (a, b) if a == b => true,
            (Uniform, Varying) => true,
            _ => false,
        }
    }

    pub fn is_uniform(self) -> bool {
        matches!(self, Uniformity::Uniform)
    }
}

/// A value-typed expression's type, always wrapped in a uniformity
/// qualifier (spec.md §3's `QualifiedType`). This is a thin, copyable
/// handle; the qualifier and inner type both live as ordinary nodes in
/// the arena so `QualifiedType` itself interns structurally like any
/// other type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct QualifiedType {
    pub uniformity: Uniformity,
    pub inner: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meet_is_pessimistic_about_unknown() {
        assert_eq!(Uniformity::Unknown.meet(Uniformity::Uniform), Uniformity::Unknown);
    }

    #[test]
    fn meet_of_two_uniforms_is_uniform() {
        assert_eq!(Uniformity::Uniform.meet(Uniformity::Uniform), Uniformity::Uniform);
    }

    #[test]
    fn uniform_is_subtype_of_varying() {
        assert!(Uniformity::Uniform.is_subtype(Uniformity::Varying));
        assert!(!Uniformity::Varying.is_subtype(Uniformity::Uniform));
    }
}
