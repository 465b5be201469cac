//! Region Builders
//!
//! The mutable region tree built alongside the blocks. Each region owns a
//! contiguous range of blocks, given by its first and last block; child
//! ranges nest inside the parent range and never overlap each other.

use std::fmt;
use std::ops::{Index, IndexMut};

use super::block::{BlockArena, BlockId};
use crate::operation::{CaptureId, LocalId, MethodId, OpRef, TypeRef};

/// Arena index of a region builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

impl RegionId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Root,
    LocalLifetime,
    Try,
    Filter,
    Catch,
    Finally,
    FilterAndHandler,
    TryAndCatch,
    TryAndFinally,
    StaticLocalInitializer,
    ErroneousBody,
}

#[derive(Debug, Clone)]
pub struct RegionBuilder {
    pub kind: RegionKind,
    pub enclosing: Option<RegionId>,
    pub exception_type: Option<TypeRef>,
    pub first_block: Option<BlockId>,
    pub last_block: Option<BlockId>,
    pub children: Vec<RegionId>,
    pub locals: Vec<LocalId>,
    pub local_functions: Vec<(MethodId, OpRef)>,
    pub capture_ids: Vec<CaptureId>,
    /// Lifetime region introduced only to hold spilled operands
    pub is_stack_spill: bool,
    /// Merged away or removed; must not be touched again
    pub freed: bool,
}

impl RegionBuilder {
    pub fn new(kind: RegionKind) -> Self {
        Self {
            kind,
            enclosing: None,
            exception_type: None,
            first_block: None,
            last_block: None,
            children: Vec::new(),
            locals: Vec::new(),
            local_functions: Vec::new(),
            capture_ids: Vec::new(),
            is_stack_spill: false,
            freed: false,
        }
    }

    pub fn with_locals(mut self, locals: Vec<LocalId>) -> Self {
        self.locals = locals;
        self
    }

    pub fn with_exception_type(mut self, ty: TypeRef) -> Self {
        self.exception_type = Some(ty);
        self
    }

    pub fn stack_spill() -> Self {
        let mut region = Self::new(RegionKind::LocalLifetime);
        region.is_stack_spill = true;
        region
    }

    pub fn is_empty(&self) -> bool {
        self.first_block.is_none()
    }

    pub fn has_locals_or_captures(&self) -> bool {
        !self.locals.is_empty() || !self.capture_ids.is_empty()
    }

    /// Declares something a lifetime region exists for
    pub fn has_declarations(&self) -> bool {
        self.has_locals_or_captures() || !self.local_functions.is_empty()
    }
}

/// Owner of every region builder of one build
#[derive(Debug, Default)]
pub struct RegionArena {
    regions: Vec<RegionBuilder>,
}

impl RegionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, region: RegionBuilder) -> RegionId {
        let id = RegionId(self.regions.len() as u32);
        self.regions.push(region);
        id
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Append `child` to `parent`'s nested regions
    pub fn add(&mut self, parent: RegionId, child: RegionId) {
        debug_assert!(!self[parent].freed && !self[child].freed);
        debug_assert!(self.pairing_allows(parent, child));
        self[child].enclosing = Some(parent);
        self[parent].children.push(child);
    }

    fn pairing_allows(&self, parent: RegionId, child: RegionId) -> bool {
        let position = self[parent].children.len();
        let kind = self[child].kind;
        match self[parent].kind {
            RegionKind::TryAndCatch => match position {
                0 => kind == RegionKind::Try,
                _ => matches!(kind, RegionKind::Catch | RegionKind::FilterAndHandler),
            },
            RegionKind::TryAndFinally => match position {
                0 => kind == RegionKind::Try,
                1 => kind == RegionKind::Finally,
                _ => false,
            },
            RegionKind::FilterAndHandler => match position {
                0 => kind == RegionKind::Filter,
                1 => kind == RegionKind::Catch,
                _ => false,
            },
            _ => !matches!(
                kind,
                RegionKind::Try
                    | RegionKind::Catch
                    | RegionKind::Filter
                    | RegionKind::Finally
                    | RegionKind::Root
            ),
        }
    }

    /// Grow `region` so its range ends at `block`
    pub fn extend_to_include(&mut self, region: RegionId, block: BlockId, blocks: &BlockArena) {
        let child_start = self[region]
            .children
            .first()
            .and_then(|child| self[*child].first_block);
        let r = &mut self.regions[region.index()];
        match r.first_block {
            None => {
                r.first_block = Some(child_start.unwrap_or(block));
                r.last_block = Some(block);
            }
            Some(_) => {
                debug_assert!(
                    r.last_block.and_then(|last| blocks[last].ordinal) <= blocks[block].ordinal,
                    "regions grow monotonically"
                );
                r.last_block = Some(block);
            }
        }
    }

    /// Detach `child` from `parent` and free it. A freed region keeps its
    /// `enclosing` link so late lookups can find where it was merged
    pub fn remove(&mut self, parent: RegionId, child: RegionId) {
        self[parent].children.retain(|c| *c != child);
        self[child].freed = true;
    }

    /// Put `replacements` where `child` sat among `parent`'s nested regions
    /// and free `child`
    pub fn replace_region(&mut self, parent: RegionId, child: RegionId, replacements: &[RegionId]) {
        let Some(position) = self[parent].children.iter().position(|c| *c == child) else {
            return;
        };
        self[parent]
            .children
            .splice(position..=position, replacements.iter().copied());
        for replacement in replacements {
            self[*replacement].enclosing = Some(parent);
        }
        let child = &mut self[child];
        child.children.clear();
        child.freed = true;
    }

    /// Fold `child` into its enclosing region: declarations move up, nested
    /// regions take its place and its blocks are remapped
    pub fn merge_into_parent(&mut self, child: RegionId, blocks: &mut BlockArena) -> RegionId {
        let Some(parent) = self[child].enclosing else {
            return child;
        };
        let locals = std::mem::take(&mut self[child].locals);
        let functions = std::mem::take(&mut self[child].local_functions);
        let captures = std::mem::take(&mut self[child].capture_ids);
        self[parent].locals.extend(locals);
        self[parent].local_functions.extend(functions);
        self[parent].capture_ids.extend(captures);

        let nested = std::mem::take(&mut self[child].children);
        self.replace_region(parent, child, &nested);

        for index in 0..blocks.len() {
            let id = BlockId(index as u32);
            if blocks[id].region == Some(child) {
                blocks[id].region = Some(parent);
            }
        }
        parent
    }

    /// Fix up ranges after `block` leaves the block order; `prev` and `next`
    /// are its neighbours in that order
    pub fn forget_block(&mut self, block: BlockId, prev: Option<BlockId>, next: Option<BlockId>) {
        for region in self.regions.iter_mut().filter(|r| !r.freed) {
            if region.first_block == Some(block) && region.last_block == Some(block) {
                region.first_block = None;
                region.last_block = None;
                continue;
            }
            if region.first_block == Some(block) {
                region.first_block = next;
            }
            if region.last_block == Some(block) {
                region.last_block = prev;
            }
        }
    }
}

impl Index<RegionId> for RegionArena {
    type Output = RegionBuilder;

    fn index(&self, id: RegionId) -> &RegionBuilder {
        &self.regions[id.index()]
    }
}

impl IndexMut<RegionId> for RegionArena {
    fn index_mut(&mut self, id: RegionId) -> &mut RegionBuilder {
        &mut self.regions[id.index()]
    }
}
