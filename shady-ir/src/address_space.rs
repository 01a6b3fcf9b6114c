//! The closed set of address spaces a pointer type can name, and the
//! per-space flags the rest of the pipeline consults.
//!
//! Grounded on `examples/original_source/include/shady/ir.h`'s
//! `AddressSpace` enum and its `is_addr_space_uniform`/`is_physical_as`
//! free functions, turned into methods per Rust idiom, and expanded to
//! the superset spec.md §3 names (the original conflates "logical" and
//! "physical" variants per space; spec.md instead carries one address
//! space per logical space plus a `physicality` flag per arena
//! configuration entry, which is what `AddressSpaceTable` below models).

/// One of the address spaces a [`crate::types::Type::Ptr`] may point
/// into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AddressSpace {
    Generic,
    Private,
    Shared,
    Subgroup,
    Global,
    Function,
    Input,
    Output,
    Uniform,
    UniformConstant,
    PushConstant,
    External,
    ProgramCode,
}

impl AddressSpace {
    /// All address spaces, in a fixed order used to size lookup tables.
    pub const ALL: [AddressSpace; 13] = [
        AddressSpace::Generic,
        AddressSpace::Private,
        AddressSpace::Shared,
        AddressSpace::Subgroup,
        AddressSpace::Global,
        AddressSpace::Function,
        AddressSpace::Input,
        AddressSpace::Output,
        AddressSpace::Uniform,
        AddressSpace::UniformConstant,
        AddressSpace::PushConstant,
        AddressSpace::External,
        AddressSpace::ProgramCode,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|a| *a == self).unwrap()
    }
}

/// Per-address-space flags, configured once on the [`crate::arena::ArenaConfig`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AddressSpaceFlags {
    /// Whether values stored in this space are guaranteed identical across
    /// a subgroup in a SIMT arena.
    pub uniform: bool,
    /// Whether pointer arithmetic (`ptr + n`) is meaningful in this space,
    /// i.e. it has a concrete linear byte layout rather than an opaque
    /// logical one.
    pub physical: bool,
    /// Whether `lower_lea` (§4.5 pass 10) must rewrite navigation in this
    /// space into explicit integer arithmetic, because the backend has no
    /// native pointer-indexing instruction for it.
    pub emulated: bool,
}

/// A table of [`AddressSpaceFlags`] plus the set of spaces an arena
/// actually allows pointers into.
#[derive(Clone, Debug)]
pub struct AddressSpaceTable {
    flags: [AddressSpaceFlags; AddressSpace::ALL.len()],
    allowed: [bool; AddressSpace::ALL.len()],
}

impl AddressSpaceTable {
    pub fn get(&self, space: AddressSpace) -> AddressSpaceFlags {
        self.flags[space.index()]
    }

    pub fn is_allowed(&self, space: AddressSpace) -> bool {
        self.allowed[space.index()]
    }

    pub fn set(&mut self, space: AddressSpace, flags: AddressSpaceFlags) {
        self.flags[space.index()] = flags;
        self.allowed[space.index()] = true;
    }
}

impl Default for AddressSpaceTable {
    /// A SPIR-V-shaped default: `Private`/`Function`/`Shared`/`Global` are
    /// physical and per-invocation-varying; `Subgroup`/`Uniform` are
    /// uniform; `Generic` is allowed but neither uniform nor physical
    /// until a lowering pass (`lower_lea`) pins it down for a target.
    fn default() -> Self {
        use AddressSpace::*;
        let mut table = AddressSpaceTable {
            flags: [AddressSpaceFlags::default(); AddressSpace::ALL.len()],
            allowed: [true; AddressSpace::ALL.len()],
        };
        table.set(
            Private,
            AddressSpaceFlags {
                uniform: false,
                physical: true,
                emulated: false,
            },
        );
        table.set(
            Function,
            AddressSpaceFlags {
                uniform: false,
                physical: true,
                emulated: false,
            },
        );
        table.set(
            Shared,
            AddressSpaceFlags {
                uniform: false,
                physical: true,
                emulated: false,
            },
        );
        table.set(
            Global,
            AddressSpaceFlags {
                uniform: false,
                physical: true,
                emulated: true,
            },
        );
        table.set(
            Subgroup,
            AddressSpaceFlags {
                uniform: true,
                physical: true,
                emulated: false,
            },
        );
        table.set(
            Uniform,
            AddressSpaceFlags {
                uniform: true,
                physical: false,
                emulated: false,
            },
        );
        table.set(
            UniformConstant,
            AddressSpaceFlags {
                uniform: true,
                physical: false,
                emulated: false,
            },
        );
        table.set(
            PushConstant,
            AddressSpaceFlags {
                uniform: true,
                physical: false,
                emulated: false,
            },
        );
        table.set(
            Generic,
            AddressSpaceFlags {
                uniform: false,
                physical: false,
                emulated: true,
            },
        );
        table.set(
            ProgramCode,
            AddressSpaceFlags {
                uniform: true,
                physical: false,
                emulated: false,
            },
        );
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subgroup_is_uniform_and_physical() {
        let table = AddressSpaceTable::default();
        let flags = table.get(AddressSpace::Subgroup);
        assert!(flags.uniform);
        assert!(flags.physical);
    }

    #[test]
    fn generic_is_emulated() {
        let table = AddressSpaceTable::default();
        assert!(table.get(AddressSpace::Generic).emulated);
    }
}
