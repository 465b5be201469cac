//! Frozen Control Flow Graphs
//!
//! The read-only result of a build. Blocks and regions are stored in flat
//! arrays and refer to each other by ordinal and region index; block 0 is
//! the entry block, the last block is the exit block and region 0 is the
//! root region. A frozen graph is `Send + Sync`; the only interior
//! mutability is write-once memoization.

use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use super::block::{BasicBlockKind, BlockArena, BlockId, BranchBuilder, BranchSemantics, ConditionKind};
use super::builder;
use super::region::{RegionArena, RegionId, RegionKind};
use crate::error::{CfgError, Result};
use crate::operation::{CaptureId, LocalId, MethodId, OpRef, Operation, OperationKind, TypeRef};
use crate::options::BuildOptions;
use crate::semantic::SemanticContext;

/// Shared handle to the semantic context of a graph family
pub type SharedSemantics = Arc<dyn SemanticContext + Send + Sync>;

/// Region lists derived from the region tree, computed on first use
#[derive(Debug, Default)]
struct RegionLists {
    leaving: OnceLock<Vec<usize>>,
    entering: OnceLock<Vec<usize>>,
    finally: OnceLock<Vec<usize>>,
}

/// An outgoing edge of a block
#[derive(Debug)]
pub struct Branch {
    pub source: usize,
    pub destination: Option<usize>,
    pub semantics: BranchSemantics,
    pub is_conditional: bool,
    lists: RegionLists,
}

impl Branch {
    fn new(source: usize, destination: Option<usize>, semantics: BranchSemantics, is_conditional: bool) -> Self {
        Self {
            source,
            destination,
            semantics,
            is_conditional,
            lists: RegionLists::default(),
        }
    }
}

/// Names one branch by its source block and edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchRef {
    pub source: usize,
    pub is_conditional: bool,
}

#[derive(Debug)]
pub struct BasicBlock {
    pub ordinal: usize,
    pub kind: BasicBlockKind,
    pub statements: Vec<OpRef>,
    pub branch_value: Option<OpRef>,
    pub condition_kind: ConditionKind,
    pub conditional: Option<Branch>,
    pub fallthrough: Option<Branch>,
    /// Incoming edges, ordered by source ordinal, conditional edges first
    pub predecessors: Vec<BranchRef>,
    pub is_reachable: bool,
    /// Innermost region containing the block
    pub region: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub kind: RegionKind,
    pub enclosing: Option<usize>,
    pub exception_type: Option<TypeRef>,
    pub first_block: usize,
    pub last_block: usize,
    pub nested: Vec<usize>,
    pub locals: Vec<LocalId>,
    pub local_functions: Vec<MethodId>,
    pub capture_ids: Vec<CaptureId>,
}

impl Region {
    pub fn contains_block(&self, ordinal: usize) -> bool {
        self.first_block <= ordinal && ordinal <= self.last_block
    }
}

#[derive(Debug, Clone)]
pub struct LocalFunctionEntry {
    pub method: MethodId,
    pub region: usize,
    pub declaration: OpRef,
}

#[derive(Debug, Clone)]
pub struct AnonymousFunctionEntry {
    pub method: MethodId,
    pub region: usize,
    pub original: OpRef,
}

/// What a nested build inherits from the graph that declares it
#[derive(Clone)]
pub(crate) struct GraphFamily {
    pub semantics: SharedSemantics,
    pub captures: Arc<std::sync::atomic::AtomicU32>,
    pub options: BuildOptions,
}

impl std::fmt::Debug for GraphFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphFamily")
            .field("captures", &self.captures)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    regions: Vec<Region>,
    local_functions: Vec<LocalFunctionEntry>,
    anonymous_functions: Vec<AnonymousFunctionEntry>,
    local_function_graphs: Vec<OnceLock<ControlFlowGraph>>,
    anonymous_function_graphs: Vec<OnceLock<ControlFlowGraph>>,
    /// Region of the declaring graph this graph was built inside
    enclosing_region: Option<usize>,
    family: GraphFamily,
}

impl ControlFlowGraph {
    /// Lower `root` with default options
    pub fn build(root: &OpRef, semantics: SharedSemantics) -> Result<Self> {
        Self::build_with(root, semantics, &BuildOptions::default())
    }

    pub fn build_with(root: &OpRef, semantics: SharedSemantics, options: &BuildOptions) -> Result<Self> {
        let family = GraphFamily {
            semantics,
            captures: Arc::new(std::sync::atomic::AtomicU32::new(0)),
            options: options.clone(),
        };
        builder::build(root, family, None)
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, ordinal: usize) -> &BasicBlock {
        &self.blocks[ordinal]
    }

    pub fn entry(&self) -> &BasicBlock {
        &self.blocks[0]
    }

    pub fn exit(&self) -> &BasicBlock {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, index: usize) -> &Region {
        &self.regions[index]
    }

    pub fn root_region(&self) -> &Region {
        &self.regions[0]
    }

    pub fn enclosing_region(&self) -> Option<usize> {
        self.enclosing_region
    }

    pub(crate) fn is_packed(&self) -> bool {
        self.family.options.pack
    }

    pub fn local_functions(&self) -> &[LocalFunctionEntry] {
        &self.local_functions
    }

    pub fn anonymous_functions(&self) -> &[AnonymousFunctionEntry] {
        &self.anonymous_functions
    }

    pub fn branch(&self, branch: BranchRef) -> Option<&Branch> {
        let block = self.blocks.get(branch.source)?;
        if branch.is_conditional {
            block.conditional.as_ref()
        } else {
            block.fallthrough.as_ref()
        }
    }

    pub fn predecessor_branches(&self, ordinal: usize) -> impl Iterator<Item = &Branch> + '_ {
        self.blocks[ordinal]
            .predecessors
            .iter()
            .filter_map(move |p| self.branch(*p))
    }

    /// Regions exited by `branch`, innermost first
    pub fn leaving_regions<'g>(&'g self, branch: &'g Branch) -> &'g [usize] {
        branch.lists.leaving.get_or_init(|| match branch.destination {
            Some(destination) => self.collect_regions(destination, self.blocks[branch.source].region),
            None => Vec::new(),
        })
    }

    /// Regions entered by `branch`, outermost first
    pub fn entering_regions<'g>(&'g self, branch: &'g Branch) -> &'g [usize] {
        branch.lists.entering.get_or_init(|| match branch.destination {
            Some(destination) => {
                let mut regions = self.collect_regions(branch.source, self.blocks[destination].region);
                regions.reverse();
                regions
            }
            None => Vec::new(),
        })
    }

    /// Finally regions run by `branch`, in execution order
    pub fn finally_regions<'g>(&'g self, branch: &'g Branch) -> &'g [usize] {
        branch.lists.finally.get_or_init(|| {
            let mut result = Vec::new();
            for region in self.leaving_regions(branch) {
                let r = &self.regions[*region];
                if r.kind != RegionKind::Try {
                    continue;
                }
                if let Some(enclosing) = r.enclosing {
                    let e = &self.regions[enclosing];
                    if e.kind == RegionKind::TryAndFinally {
                        if let Some(finally) = e.nested.last() {
                            result.push(*finally);
                        }
                    }
                }
            }
            result
        })
    }

    /// Regions from `start` outward that do not contain `ordinal`
    fn collect_regions(&self, ordinal: usize, start: usize) -> Vec<usize> {
        let mut result = Vec::new();
        let mut current = Some(start);
        while let Some(index) = current {
            let region = &self.regions[index];
            if region.contains_block(ordinal) {
                break;
            }
            result.push(index);
            current = region.enclosing;
        }
        result
    }

    /// Graph of the local function `method`, built on first request
    pub fn local_function_graph(&self, method: MethodId) -> Result<&ControlFlowGraph> {
        let index = self
            .local_functions
            .iter()
            .position(|f| f.method == method)
            .ok_or(CfgError::UnknownLocalFunction(method))?;
        if let Some(graph) = self.local_function_graphs[index].get() {
            return Ok(graph);
        }
        let entry = &self.local_functions[index];
        let body = match &entry.declaration.kind {
            OperationKind::LocalFunction { body, .. } => body.clone(),
            _ => entry.declaration.clone(),
        };
        let graph = builder::build(&body, self.family.clone(), Some(entry.region))?;
        Ok(self.local_function_graphs[index].get_or_init(|| graph))
    }

    /// Graph of a lambda, given the flow anonymous function operation that
    /// stands for it in this graph
    pub fn anonymous_function_graph(&self, function: &Operation) -> Result<&ControlFlowGraph> {
        let OperationKind::FlowAnonymousFunction { ordinal, .. } = function.kind else {
            return Err(CfgError::UnsupportedOperation {
                kind: function.kind_name(),
            });
        };
        let index = ordinal as usize;
        let entry = self
            .anonymous_functions
            .get(index)
            .ok_or(CfgError::UnknownAnonymousFunction(ordinal))?;
        if let Some(graph) = self.anonymous_function_graphs[index].get() {
            return Ok(graph);
        }
        let body = match &entry.original.kind {
            OperationKind::AnonymousFunction { body, .. } => body.clone(),
            _ => entry.original.clone(),
        };
        let graph = builder::build(&body, self.family.clone(), Some(entry.region))?;
        Ok(self.anonymous_function_graphs[index].get_or_init(|| graph))
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [BasicBlock] {
        &mut self.blocks
    }
}

/// Everything the builder hands over when it is done
pub(crate) struct FrozenParts {
    pub blocks: BlockArena,
    pub order: Vec<BlockId>,
    pub regions: RegionArena,
    pub root: RegionId,
    pub local_functions: Vec<(MethodId, RegionId, OpRef)>,
    pub anonymous_functions: Vec<(MethodId, RegionId, OpRef)>,
}

/// Consume the builder arenas and produce the frozen graph
pub(crate) fn freeze(parts: FrozenParts, family: GraphFamily, enclosing_region: Option<usize>) -> ControlFlowGraph {
    let FrozenParts {
        blocks: arena,
        order,
        regions: region_arena,
        root,
        local_functions,
        anonymous_functions,
    } = parts;

    let ordinal_of = |id: BlockId| arena[id].ordinal.unwrap_or(0);

    let mut block_region = vec![0usize; order.len()];
    let mut regions = Vec::new();
    let mut region_index = FxHashMap::default();
    freeze_region(
        &region_arena,
        root,
        None,
        &ordinal_of,
        &mut regions,
        &mut block_region,
        &mut region_index,
    );

    let mut blocks: Vec<BasicBlock> = order
        .iter()
        .enumerate()
        .map(|(ordinal, id)| {
            let builder = &arena[*id];
            let resolve = |branch: &BranchBuilder, is_conditional: bool| -> Branch {
                match branch.destination.and_then(|d| arena[d].ordinal) {
                    Some(destination) => Branch::new(ordinal, Some(destination), branch.semantics, is_conditional),
                    None if branch.destination.is_some() => {
                        Branch::new(ordinal, None, BranchSemantics::Error, is_conditional)
                    }
                    None => Branch::new(ordinal, None, branch.semantics, is_conditional),
                }
            };
            BasicBlock {
                ordinal,
                kind: builder.kind,
                statements: builder.statements().to_vec(),
                branch_value: builder.branch_value.clone(),
                condition_kind: builder.condition_kind,
                conditional: builder
                    .has_condition()
                    .then(|| resolve(&builder.conditional, true)),
                fallthrough: (builder.kind != BasicBlockKind::Exit).then(|| resolve(&builder.fallthrough, false)),
                predecessors: Vec::new(),
                is_reachable: false,
                region: block_region[ordinal],
            }
        })
        .collect();

    let mut incoming: Vec<Vec<BranchRef>> = vec![Vec::new(); blocks.len()];
    for block in &blocks {
        for branch in block.conditional.iter().chain(block.fallthrough.iter()) {
            if let Some(destination) = branch.destination {
                incoming[destination].push(BranchRef {
                    source: branch.source,
                    is_conditional: branch.is_conditional,
                });
            }
        }
    }
    for (block, mut preds) in blocks.iter_mut().zip(incoming) {
        preds.sort_by_key(|p| (p.source, !p.is_conditional));
        block.predecessors = preds;
    }

    let resolve_region = |mut id: RegionId| -> usize {
        loop {
            if let Some(index) = region_index.get(&id) {
                return *index;
            }
            match region_arena[id].enclosing {
                Some(parent) => id = parent,
                None => return 0,
            }
        }
    };

    let local_functions: Vec<LocalFunctionEntry> = local_functions
        .into_iter()
        .map(|(method, region, declaration)| LocalFunctionEntry {
            method,
            region: resolve_region(region),
            declaration,
        })
        .collect();
    let anonymous_functions: Vec<AnonymousFunctionEntry> = anonymous_functions
        .into_iter()
        .map(|(method, region, original)| AnonymousFunctionEntry {
            method,
            region: resolve_region(region),
            original,
        })
        .collect();

    ControlFlowGraph {
        local_function_graphs: local_functions.iter().map(|_| OnceLock::new()).collect(),
        anonymous_function_graphs: anonymous_functions.iter().map(|_| OnceLock::new()).collect(),
        blocks,
        regions,
        local_functions,
        anonymous_functions,
        enclosing_region,
        family,
    }
}

fn freeze_region(
    arena: &RegionArena,
    id: RegionId,
    enclosing: Option<usize>,
    ordinal_of: &dyn Fn(BlockId) -> usize,
    out: &mut Vec<Region>,
    block_region: &mut [usize],
    region_index: &mut FxHashMap<RegionId, usize>,
) -> usize {
    let builder = &arena[id];
    let index = out.len();
    region_index.insert(id, index);
    let first_block = builder.first_block.map(ordinal_of).unwrap_or(0);
    let last_block = builder.last_block.map(ordinal_of).unwrap_or(0);
    let mut capture_ids = builder.capture_ids.clone();
    capture_ids.sort();
    out.push(Region {
        kind: builder.kind,
        enclosing,
        exception_type: builder.exception_type.clone(),
        first_block,
        last_block,
        nested: Vec::new(),
        locals: builder.locals.clone(),
        local_functions: builder.local_functions.iter().map(|(m, _)| *m).collect(),
        capture_ids,
    });

    let nested: Vec<usize> = builder
        .children
        .iter()
        .map(|child| freeze_region(arena, *child, Some(index), ordinal_of, out, block_region, region_index))
        .collect();

    let mut ordinal = first_block;
    let mut children = nested.iter().peekable();
    while ordinal <= last_block && ordinal < block_region.len() {
        if let Some(child) = children.peek() {
            let child = &out[**child];
            if child.first_block == ordinal {
                ordinal = child.last_block + 1;
                children.next();
                continue;
            }
        }
        block_region[ordinal] = index;
        ordinal += 1;
    }

    out[index].nested = nested;
    index
}
