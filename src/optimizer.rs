//! Code chunk optimizer.
//!
//! Removes and merges redundant chunks without changing what the script
//! leaves behind. Each pass builds an interference graph over the chunk
//! list (an edge wherever two footprints conflict), looks for the first pair
//! of chunks that a rule can rewrite and that no chunk between them
//! interferes with, applies that rewrite, and starts over. The loop stops at
//! a fixed point or after `max_optimizer_passes`.
//!
//! Every rewrite shrinks the list, so the loop terminates; the pass bound
//! only guards against rule bugs.
//!
//! Column inserts are positional, so two inserts on one sheet always
//! interfere: cancelling an earlier insert would shift where a later one
//! lands. Likewise a chunk that frees or takes a header or dataframe
//! variable interferes with every chunk using that name, so a merged rename
//! never lands on a name something else holds at that point.

use crate::code_chunks::{BlockOutput, ChunkKind, CodeChunk, Columns};
use crate::column_headers::{ColumnHeader, ColumnId};
use crate::config::EngineSettings;
use crate::error::{Result, SheetError};
use crate::state::{SheetId, State};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

/// Report produced by one optimizer run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizationReport {
    /// Chunks going in
    pub chunks_before: usize,
    /// Chunks coming out
    pub chunks_after: usize,
    /// Rewrites applied
    pub rewrites: usize,
    /// Passes run, including the final one that found nothing
    pub passes: usize,
    /// Pass bound was hit before a fixed point
    pub hit_pass_limit: bool,
}

/// Chunks whose footprints conflict, as adjacency sets indexed by position.
#[derive(Debug, Clone)]
pub struct InterferenceGraph {
    edges: Vec<BTreeSet<usize>>,
}

impl InterferenceGraph {
    pub fn build(chunks: &[CodeChunk]) -> Self {
        let footprints: Vec<_> = chunks.iter().map(CodeChunk::footprint).collect();
        let mut edges = vec![BTreeSet::new(); chunks.len()];
        for (i, a) in footprints.iter().enumerate() {
            for (j, b) in footprints.iter().enumerate().skip(i + 1) {
                if a.conflicts_with(b) {
                    if let Some(set) = edges.get_mut(i) {
                        set.insert(j);
                    }
                    if let Some(set) = edges.get_mut(j) {
                        set.insert(i);
                    }
                }
            }
        }
        Self { edges }
    }

    pub fn interferes(&self, a: usize, b: usize) -> bool {
        self.edges.get(a).is_some_and(|set| set.contains(&b))
    }

    /// No chunk strictly between `older` and `newer` interferes with either.
    pub fn clear_between(&self, older: usize, newer: usize) -> bool {
        (older + 1..newer).all(|k| !self.interferes(k, older) && !self.interferes(k, newer))
    }
}

/// What to do with a pair of chunks.
#[derive(Debug, Clone, PartialEq)]
enum Rewrite {
    DropOlder,
    DropBoth,
    /// Replace the older chunk and drop the newer one.
    Merge(ChunkKind),
    /// Drop the older chunk and replace the newer one.
    DropOlderReplaceNewer(ChunkKind),
}

fn deleted_by(kind: &ChunkKind, target_sheet: SheetId, column: &ColumnId) -> bool {
    matches!(
        kind,
        ChunkKind::DeleteColumns { sheet, column_ids, .. }
            if *sheet == target_sheet && column_ids.contains(column)
    )
}

fn rewrite_for(older: &CodeChunk, newer: &CodeChunk) -> Option<Rewrite> {
    use ChunkKind as K;

    match (&older.kind, &newer.kind) {
        (K::SetFormula { sheet, column_id, .. }, _) if deleted_by(&newer.kind, *sheet, column_id) => {
            Some(Rewrite::DropOlder)
        }
        (K::ChangeDtype { sheet, column_id, .. }, _) if deleted_by(&newer.kind, *sheet, column_id) => {
            Some(Rewrite::DropOlder)
        }
        (
            K::AddColumn { sheet, column_id, .. },
            K::DeleteColumns {
                sheet: deleted_sheet,
                df,
                column_ids,
                headers,
            },
        ) if sheet == deleted_sheet && column_ids.contains(column_id) => {
            let (column_ids, headers): (Vec<_>, Vec<_>) = column_ids
                .iter()
                .zip(headers)
                .filter(|(id, _)| *id != column_id)
                .map(|(id, header)| (id.clone(), header.clone()))
                .unzip();
            if column_ids.is_empty() {
                Some(Rewrite::DropBoth)
            } else {
                Some(Rewrite::DropOlderReplaceNewer(K::DeleteColumns {
                    sheet: *sheet,
                    df: df.clone(),
                    column_ids,
                    headers,
                }))
            }
        }
        (
            K::AddColumn {
                sheet,
                df,
                column_id,
                header,
                index,
                ..
            },
            K::SetFormula {
                sheet: formula_sheet,
                column_id: formula_column,
                value,
                reads,
                ..
            },
        ) if sheet == formula_sheet && column_id == formula_column && !reads.contains(column_id) => {
            Some(Rewrite::Merge(K::AddColumn {
                sheet: *sheet,
                df: df.clone(),
                column_id: column_id.clone(),
                header: header.clone(),
                index: *index,
                value: Some(value.clone()),
                value_reads: reads.clone(),
            }))
        }
        (
            K::SetFormula { sheet, column_id, .. },
            K::SetFormula {
                sheet: newer_sheet,
                column_id: newer_column,
                reads,
                ..
            },
        ) if sheet == newer_sheet && column_id == newer_column && !reads.contains(column_id) => {
            Some(Rewrite::DropOlder)
        }
        (
            K::RenameColumn {
                sheet,
                df,
                column_id,
                old_header,
                ..
            },
            K::RenameColumn {
                sheet: newer_sheet,
                column_id: newer_column,
                new_header,
                ..
            },
        ) if sheet == newer_sheet && column_id == newer_column => {
            // The merged rename runs where the older one did. Header footprints
            // keep a rename that frees or takes either header from sitting between.
            if old_header == new_header {
                Some(Rewrite::DropBoth)
            } else {
                Some(Rewrite::Merge(K::RenameColumn {
                    sheet: *sheet,
                    df: df.clone(),
                    column_id: column_id.clone(),
                    old_header: old_header.clone(),
                    new_header: new_header.clone(),
                }))
            }
        }
        (
            K::RenameDataframe { sheet, old_name, .. },
            K::RenameDataframe {
                sheet: newer_sheet,
                new_name,
                ..
            },
        ) if sheet == newer_sheet => {
            if old_name == new_name {
                Some(Rewrite::DropBoth)
            } else {
                Some(Rewrite::Merge(K::RenameDataframe {
                    sheet: *sheet,
                    old_name: old_name.clone(),
                    new_name: new_name.clone(),
                }))
            }
        }
        (K::RenameDataframe { sheet, old_name, .. }, K::DeleteDataframe { sheet: deleted, .. })
            if sheet == deleted =>
        {
            Some(Rewrite::DropOlderReplaceNewer(K::DeleteDataframe {
                sheet: *sheet,
                df: old_name.clone(),
            }))
        }
        // Only the edits drop. An input sheet's variable exists before the
        // script runs, so its `del` stays even when nothing else is left.
        (_, K::DeleteDataframe { sheet: deleted, .. }) if older.is_droppable() => {
            let footprint = older.footprint();
            if footprint.touched_sheets() != BTreeSet::from([*deleted]) {
                return None;
            }
            if footprint.creates.contains(deleted) {
                Some(Rewrite::DropBoth)
            } else {
                Some(Rewrite::DropOlder)
            }
        }
        _ => None,
    }
}

/// First rewritable pair, scanning older chunks first.
fn find_rewrite(chunks: &[CodeChunk]) -> Option<(usize, usize, Rewrite)> {
    let graph = InterferenceGraph::build(chunks);
    for (i, older) in chunks.iter().enumerate() {
        for (j, newer) in chunks.iter().enumerate().skip(i + 1) {
            if !graph.clear_between(i, j) {
                continue;
            }
            if let Some(rewrite) = rewrite_for(older, newer) {
                return Some((i, j, rewrite));
            }
        }
    }
    None
}

fn apply(chunks: &mut Vec<CodeChunk>, older: usize, newer: usize, rewrite: Rewrite) {
    match rewrite {
        Rewrite::DropOlder => {
            chunks.remove(older);
        }
        Rewrite::DropBoth => {
            chunks.remove(newer);
            chunks.remove(older);
        }
        Rewrite::Merge(kind) => {
            chunks.remove(newer);
            if let Some(chunk) = chunks.get_mut(older) {
                chunk.kind = kind;
            }
        }
        Rewrite::DropOlderReplaceNewer(kind) => {
            if let Some(chunk) = chunks.get_mut(newer) {
                chunk.kind = kind;
            }
            chunks.remove(older);
        }
    }
}

/// One input sheet: its variable name and its columns, left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSheet {
    pub name: String,
    pub columns: Vec<(ColumnId, ColumnHeader)>,
}

/// Every sheet the script starts from.
pub type InputLayout = BTreeMap<SheetId, InputSheet>;

/// The layout the script starts from: every sheet of `state`.
pub fn input_layout(state: &State) -> InputLayout {
    state
        .sheets()
        .iter()
        .map(|sheet| {
            let input = InputSheet {
                name: sheet.name.clone(),
                columns: sheet.column_ids().into_iter().zip(sheet.headers()).collect(),
            };
            (sheet.id, input)
        })
        .collect()
}

/// Optimize `chunks` to a fixed point.
///
/// # Errors
///
/// `OptimizationInvariantViolation` when `settings.verify_optimization` is on
/// and the optimized chunks would leave different dataframes behind.
pub fn optimize(
    chunks: Vec<CodeChunk>,
    inputs: &InputLayout,
    settings: &EngineSettings,
) -> Result<(Vec<CodeChunk>, OptimizationReport)> {
    let mut report = OptimizationReport {
        chunks_before: chunks.len(),
        ..OptimizationReport::default()
    };
    let original = settings.verify_optimization.then(|| chunks.clone());
    let mut chunks = chunks;

    loop {
        if report.passes >= settings.max_optimizer_passes {
            report.hit_pass_limit = true;
            tracing::warn!(
                passes = report.passes,
                chunks = chunks.len(),
                "optimizer pass limit reached, keeping partially optimized code"
            );
            break;
        }
        report.passes += 1;
        let Some((older, newer, rewrite)) = find_rewrite(&chunks) else {
            break;
        };
        tracing::debug!(
            pass = report.passes,
            older = chunks.get(older).map(CodeChunk::display_name),
            newer = chunks.get(newer).map(CodeChunk::display_name),
            rewrite = ?rewrite,
            "optimizer rewrite"
        );
        apply(&mut chunks, older, newer, rewrite);
        report.rewrites += 1;
    }

    if let Some(original) = original {
        verify(&original, &chunks, inputs)?;
    }
    report.chunks_after = chunks.len();
    Ok((chunks, report))
}

/// Check that `optimized` leaves the same dataframes behind as `original`,
/// both starting from `inputs`.
///
/// Both lists run against a symbolic pandas: variables bind frames, frames
/// hold columns by header in order, and every column value is a hash of the
/// code and inputs that produced it. Statements resolve their target by
/// variable name and header, so a chunk that lands on a name another sheet or
/// column holds at that point shows up as a fault or a different frame.
///
/// # Errors
///
/// `OptimizationInvariantViolation` naming the first fault or variable that
/// differs.
pub fn verify(original: &[CodeChunk], optimized: &[CodeChunk], inputs: &InputLayout) -> Result<()> {
    let expected = Model::run(original, inputs);
    let actual = Model::run(optimized, inputs);
    if let Some(fault) = actual.faults.iter().find(|f| !expected.faults.contains(*f)) {
        return Err(SheetError::OptimizationInvariantViolation(format!(
            "optimized code fails: {fault}"
        )));
    }
    let expected_frames = expected.bound_frames();
    let actual_frames = actual.bound_frames();
    let names: BTreeSet<&str> = expected_frames.keys().chain(actual_frames.keys()).copied().collect();
    for name in names {
        let a = expected_frames.get(name);
        let b = actual_frames.get(name);
        if a != b {
            return Err(SheetError::OptimizationInvariantViolation(format!(
                "optimized code leaves {name} as {b:?}, expected {a:?}"
            )));
        }
    }
    if expected.effects != actual.effects {
        return Err(SheetError::OptimizationInvariantViolation(
            "optimized code exports different data".to_owned(),
        ));
    }
    Ok(())
}

/// Headers of every live sheet, left to right, after running `chunks` from
/// `inputs` the way pandas would.
///
/// # Errors
///
/// `OptimizationInvariantViolation` when a statement would fail or misfire in
/// pandas: an insert past the end of its frame or of a header that exists, a
/// drop of a missing column, a rename onto a header in use, or a variable
/// that names a different sheet than the chunk meant.
pub fn column_layout(
    chunks: &[CodeChunk],
    inputs: &InputLayout,
) -> Result<BTreeMap<SheetId, Vec<ColumnHeader>>> {
    let model = Model::run(chunks, inputs);
    if let Some(fault) = model.faults.first() {
        return Err(SheetError::OptimizationInvariantViolation(fault.clone()));
    }
    Ok(model
        .sheets
        .iter()
        .filter(|(_, object)| model.is_bound(**object))
        .filter_map(|(sheet, object)| {
            let frame = model.objects.get(*object)?;
            Some((*sheet, frame.iter().map(|c| c.header.clone()).collect()))
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SymbolicColumn {
    id: String,
    header: ColumnHeader,
    token: u64,
}

/// Columns left to right. Headers may repeat, as they can in pandas.
type Frame = Vec<SymbolicColumn>;

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn input_token(sheet: SheetId, id: &str) -> u64 {
    hash_of(&("input", sheet.0, id))
}

#[derive(Debug, Default)]
struct Model {
    /// Every frame object ever built; variables index into this.
    objects: Vec<Frame>,
    vars: BTreeMap<String, usize>,
    /// Object each sheet's chunks expect to act on.
    sheets: BTreeMap<SheetId, usize>,
    /// Hashes of what `keep` blocks saw, in order.
    effects: Vec<u64>,
    /// Statements pandas would reject or run against the wrong frame.
    faults: Vec<String>,
}

impl Model {
    fn run(chunks: &[CodeChunk], inputs: &InputLayout) -> Self {
        let mut model = Self::default();
        for (sheet, input) in inputs {
            let frame = input
                .columns
                .iter()
                .map(|(id, header)| SymbolicColumn {
                    id: id.as_str().to_owned(),
                    header: header.clone(),
                    token: input_token(*sheet, id.as_str()),
                })
                .collect();
            let object = model.push(frame);
            model.vars.insert(input.name.clone(), object);
            model.sheets.insert(*sheet, object);
        }
        for chunk in chunks {
            model.step(&chunk.kind);
        }
        model
    }

    fn push(&mut self, frame: Frame) -> usize {
        self.objects.push(frame);
        self.objects.len() - 1
    }

    fn is_bound(&self, object: usize) -> bool {
        self.vars.values().any(|bound| *bound == object)
    }

    fn bound_frames(&self) -> BTreeMap<&str, &Frame> {
        self.vars
            .iter()
            .filter_map(|(name, object)| Some((name.as_str(), self.objects.get(*object)?)))
            .collect()
    }

    /// Object `df` names, faulting when it is unbound or not `sheet`'s.
    fn resolve(&mut self, sheet: SheetId, df: &str) -> Option<usize> {
        let Some(object) = self.vars.get(df).copied() else {
            self.faults.push(format!("{df} is not defined"));
            return None;
        };
        if self.sheets.get(&sheet) != Some(&object) {
            self.faults.push(format!("{df} does not hold {sheet}"));
        }
        Some(object)
    }

    fn bind(&mut self, name: &str, object: usize, sheet: SheetId) {
        if let Some(previous) = self.vars.get(name).copied()
            && previous != object
            && self.sheets.get(&sheet) != Some(&previous)
        {
            self.faults
                .push(format!("{name} is rebound while it still holds another sheet"));
        }
        self.vars.insert(name.to_owned(), object);
        self.sheets.insert(sheet, object);
    }

    fn unbind(&mut self, name: &str) {
        if self.vars.remove(name).is_none() {
            self.faults.push(format!("del of undefined {name}"));
        }
        let live: BTreeSet<usize> = self.vars.values().copied().collect();
        self.sheets.retain(|_, object| live.contains(object));
    }

    fn tokens_of(&self, object: usize, ids: &[ColumnId]) -> Vec<Option<u64>> {
        let frame = self.objects.get(object);
        ids.iter()
            .map(|id| {
                frame
                    .and_then(|f| f.iter().find(|c| c.id == id.as_str()))
                    .map(|c| c.token)
            })
            .collect()
    }

    /// Digest of everything a whole-sheet read can see.
    fn digest(&self, sheet: SheetId) -> u64 {
        hash_of(&self.sheets.get(&sheet).and_then(|object| self.objects.get(*object)))
    }

    fn with_frame(&mut self, object: usize, edit: impl FnOnce(&mut Frame, &mut Vec<String>)) {
        if let Some(frame) = self.objects.get_mut(object) {
            edit(frame, &mut self.faults);
        }
    }

    fn step(&mut self, kind: &ChunkKind) {
        match kind {
            ChunkKind::AddColumn {
                sheet,
                df,
                column_id,
                header,
                index,
                value,
                value_reads,
            } => {
                let Some(object) = self.resolve(*sheet, df) else {
                    return;
                };
                let inputs = self.tokens_of(object, value_reads);
                let code = value.as_deref().unwrap_or("0");
                let column = SymbolicColumn {
                    id: column_id.as_str().to_owned(),
                    header: header.clone(),
                    token: hash_of(&("value", code, inputs)),
                };
                self.with_frame(object, |frame, faults| {
                    if frame.iter().any(|c| c.header == *header) {
                        faults.push(format!("insert of {header}, which already exists in {df}"));
                    } else if *index > frame.len() {
                        faults.push(format!(
                            "insert of {header} at {index} into {} columns of {df}",
                            frame.len()
                        ));
                        frame.push(column);
                    } else {
                        frame.insert(*index, column);
                    }
                });
            }
            ChunkKind::SetFormula {
                sheet,
                df,
                column_id,
                header,
                value,
                reads,
            } => {
                let Some(object) = self.resolve(*sheet, df) else {
                    return;
                };
                let inputs = self.tokens_of(object, reads);
                let token = hash_of(&("value", value.as_str(), inputs));
                self.with_frame(object, |frame, _| {
                    let mut found = false;
                    for column in frame.iter_mut().filter(|c| c.header == *header) {
                        column.token = token;
                        found = true;
                    }
                    if !found {
                        frame.push(SymbolicColumn {
                            id: column_id.as_str().to_owned(),
                            header: header.clone(),
                            token,
                        });
                    }
                });
            }
            ChunkKind::DeleteColumns {
                sheet, df, headers, ..
            } => {
                let Some(object) = self.resolve(*sheet, df) else {
                    return;
                };
                self.with_frame(object, |frame, faults| {
                    for header in headers {
                        let before = frame.len();
                        frame.retain(|c| c.header != *header);
                        if frame.len() == before {
                            faults.push(format!("drop of missing column {header} from {df}"));
                        }
                    }
                });
            }
            ChunkKind::RenameColumn {
                sheet,
                df,
                old_header,
                new_header,
                ..
            } => {
                let Some(object) = self.resolve(*sheet, df) else {
                    return;
                };
                self.with_frame(object, |frame, faults| {
                    if !frame.iter().any(|c| c.header == *old_header) {
                        faults.push(format!("rename of missing column {old_header} in {df}"));
                    }
                    if frame.iter().any(|c| c.header == *new_header) {
                        faults.push(format!("rename to {new_header}, which already exists in {df}"));
                    }
                    for column in frame.iter_mut().filter(|c| c.header == *old_header) {
                        column.header = new_header.clone();
                    }
                });
            }
            ChunkKind::ChangeDtype {
                sheet,
                df,
                header,
                statements,
                ..
            } => {
                let Some(object) = self.resolve(*sheet, df) else {
                    return;
                };
                self.with_frame(object, |frame, faults| {
                    let mut found = false;
                    for column in frame.iter_mut().filter(|c| c.header == *header) {
                        column.token = hash_of(&(statements, column.token));
                        found = true;
                    }
                    if !found {
                        faults.push(format!("dtype change of missing column {header} in {df}"));
                    }
                });
            }
            ChunkKind::DuplicateDataframe {
                source,
                source_df,
                sheet,
                new_df,
            } => {
                let Some(object) = self.resolve(*source, source_df) else {
                    return;
                };
                let copy = self.objects.get(object).cloned().unwrap_or_default();
                let copied = self.push(copy);
                self.bind(new_df, copied, *sheet);
            }
            ChunkKind::DeleteDataframe { sheet, df } => {
                self.resolve(*sheet, df);
                self.unbind(df);
            }
            ChunkKind::RenameDataframe {
                sheet,
                old_name,
                new_name,
            } => {
                let Some(object) = self.resolve(*sheet, old_name) else {
                    return;
                };
                self.bind(new_name, object, *sheet);
                self.unbind(old_name);
            }
            ChunkKind::Block {
                statements,
                footprint,
                outputs,
                keep,
                ..
            } => {
                let inputs: Vec<u64> = footprint.reads.keys().map(|s| self.digest(*s)).collect();
                let seed = hash_of(&(statements, inputs));
                if *keep {
                    self.effects.push(seed);
                }
                for sheet in &footprint.deletes {
                    if let Some(object) = self.sheets.remove(sheet) {
                        self.vars.retain(|_, bound| *bound != object);
                    }
                }
                for output in outputs {
                    self.write_output(seed, output, footprint.writes.get(&output.sheet));
                }
            }
        }
    }

    /// Bind a block's output to a new frame. Columns outside a partial
    /// write keep the values they had.
    fn write_output(&mut self, seed: u64, output: &BlockOutput, written: Option<&Columns>) {
        let previous = self
            .sheets
            .get(&output.sheet)
            .and_then(|object| self.objects.get(*object));
        let frame: Frame = output
            .columns
            .iter()
            .map(|(id, header)| {
                let touched = match written {
                    Some(Columns::Some(ids)) => ids.contains(id),
                    _ => true,
                };
                let kept = previous
                    .filter(|_| !touched)
                    .and_then(|frame| frame.iter().find(|c| c.id == id.as_str()))
                    .map(|c| c.token);
                SymbolicColumn {
                    id: id.as_str().to_owned(),
                    header: header.clone(),
                    token: kept.unwrap_or_else(|| hash_of(&(seed, id.as_str()))),
                }
            })
            .collect();
        let object = self.push(frame);
        self.bind(&output.name, object, output.sheet);
    }
}
