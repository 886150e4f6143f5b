//! Units of generated code.
//!
//! Every step transpiles into zero or more [`CodeChunk`]s. A chunk knows the
//! statements it emits, a one-line description, and its [`Footprint`]: which
//! sheets and columns it reads, writes, creates and deletes, and which
//! dataframe variables and headers its statements use or rebind. The optimizer
//! only ever reasons about footprints; it never looks at statement text.
//!
//! Column-level edits keep their own [`ChunkKind`] variants so the optimizer
//! can merge or cancel them. Everything that rewrites a whole sheet (sorts,
//! pivots, merges, imports, exports) is a [`ChunkKind::Block`].

pub mod python;

use crate::column_headers::{ColumnHeader, ColumnId};
use crate::state::SheetId;
use python::{py_str, py_str_list};
use std::collections::{BTreeMap, BTreeSet};

/// Columns of one sheet touched by a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Columns {
    All,
    Some(BTreeSet<ColumnId>),
}

impl Columns {
    pub fn one(id: ColumnId) -> Self {
        Self::Some(BTreeSet::from([id]))
    }

    pub fn many<I: IntoIterator<Item = ColumnId>>(ids: I) -> Self {
        Self::Some(ids.into_iter().collect())
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => true,
            (Self::Some(a), Self::Some(b)) => !a.is_disjoint(b),
        }
    }

    fn merge(&mut self, other: Self) {
        match other {
            Self::All => *self = Self::All,
            Self::Some(more) => {
                if let Self::Some(existing) = self {
                    existing.extend(more);
                }
            }
        }
    }
}

/// A name the generated statements refer to.
///
/// Ids follow a column or sheet through renames, but statements address
/// columns by header and sheets by variable name, and those names move from
/// one column or sheet to another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Name {
    Variable(String),
    Header(SheetId, ColumnHeader),
}

/// What a chunk reads and changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footprint {
    pub reads: BTreeMap<SheetId, Columns>,
    pub writes: BTreeMap<SheetId, Columns>,
    pub creates: BTreeSet<SheetId>,
    pub deletes: BTreeSet<SheetId>,
    /// Sheets whose column positions this chunk both depends on and shifts.
    pub positions: BTreeSet<SheetId>,
    /// Names the statements look up.
    pub uses: BTreeSet<Name>,
    /// Names the statements bind or free.
    pub binds: BTreeSet<Name>,
}

impl Footprint {
    pub fn read(mut self, sheet: SheetId, columns: Columns) -> Self {
        add_columns(&mut self.reads, sheet, columns);
        self
    }

    pub fn write(mut self, sheet: SheetId, columns: Columns) -> Self {
        add_columns(&mut self.writes, sheet, columns);
        self
    }

    pub fn create(mut self, sheet: SheetId) -> Self {
        self.creates.insert(sheet);
        self
    }

    pub fn delete(mut self, sheet: SheetId) -> Self {
        self.deletes.insert(sheet);
        self
    }

    pub fn positional(mut self, sheet: SheetId) -> Self {
        self.positions.insert(sheet);
        self
    }

    pub fn uses(mut self, name: Name) -> Self {
        self.uses.insert(name);
        self
    }

    pub fn binds(mut self, name: Name) -> Self {
        self.binds.insert(name);
        self
    }

    /// Everything this chunk changes, with creation and deletion counted as
    /// writing the whole sheet.
    fn effective_writes(&self) -> BTreeMap<SheetId, Columns> {
        let mut writes = self.writes.clone();
        for sheet in self.creates.iter().chain(&self.deletes) {
            writes.insert(*sheet, Columns::All);
        }
        writes
    }

    /// Sheets whose contents this chunk changes, creates or deletes.
    pub fn touched_sheets(&self) -> BTreeSet<SheetId> {
        self.effective_writes().into_keys().collect()
    }

    /// True when running `self` and `other` in the opposite order could change
    /// what either of them sees or produces.
    pub fn conflicts_with(&self, other: &Self) -> bool {
        let mine = self.effective_writes();
        let theirs = other.effective_writes();
        overlaps(&mine, &other.reads)
            || overlaps(&mine, &theirs)
            || overlaps(&self.reads, &theirs)
            || !self.positions.is_disjoint(&other.positions)
            || !self.binds.is_disjoint(&other.binds)
            || !self.binds.is_disjoint(&other.uses)
            || !self.uses.is_disjoint(&other.binds)
    }
}

fn add_columns(map: &mut BTreeMap<SheetId, Columns>, sheet: SheetId, columns: Columns) {
    match map.get_mut(&sheet) {
        Some(existing) => existing.merge(columns),
        None => {
            map.insert(sheet, columns);
        }
    }
}

fn overlaps(a: &BTreeMap<SheetId, Columns>, b: &BTreeMap<SheetId, Columns>) -> bool {
    a.iter()
        .any(|(sheet, cols)| b.get(sheet).is_some_and(|other| cols.overlaps(other)))
}

/// A sheet as it looks after a [`ChunkKind::Block`] ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutput {
    pub sheet: SheetId,
    pub name: String,
    pub columns: Vec<(ColumnId, ColumnHeader)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkKind {
    AddColumn {
        sheet: SheetId,
        df: String,
        column_id: ColumnId,
        header: ColumnHeader,
        index: usize,
        /// Pandas expression for the initial values; `0` when absent.
        value: Option<String>,
        value_reads: Vec<ColumnId>,
    },
    DeleteColumns {
        sheet: SheetId,
        df: String,
        column_ids: Vec<ColumnId>,
        headers: Vec<ColumnHeader>,
    },
    RenameColumn {
        sheet: SheetId,
        df: String,
        column_id: ColumnId,
        old_header: ColumnHeader,
        new_header: ColumnHeader,
    },
    SetFormula {
        sheet: SheetId,
        df: String,
        column_id: ColumnId,
        header: ColumnHeader,
        value: String,
        reads: Vec<ColumnId>,
    },
    ChangeDtype {
        sheet: SheetId,
        df: String,
        column_id: ColumnId,
        header: ColumnHeader,
        statements: Vec<String>,
    },
    DuplicateDataframe {
        source: SheetId,
        source_df: String,
        sheet: SheetId,
        new_df: String,
    },
    DeleteDataframe {
        sheet: SheetId,
        df: String,
    },
    RenameDataframe {
        sheet: SheetId,
        old_name: String,
        new_name: String,
    },
    /// Whole-sheet operation that the optimizer treats as opaque.
    Block {
        display_name: &'static str,
        description: String,
        statements: Vec<String>,
        footprint: Footprint,
        outputs: Vec<BlockOutput>,
        /// Blocks with effects outside the script's dataframes (file writes) are never dropped.
        keep: bool,
    },
}

/// Generated code for one step, or for several steps the optimizer merged.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeChunk {
    pub step_id: String,
    pub kind: ChunkKind,
}

impl CodeChunk {
    pub fn new(step_id: impl Into<String>, kind: ChunkKind) -> Self {
        Self {
            step_id: step_id.into(),
            kind,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match &self.kind {
            ChunkKind::AddColumn { .. } => "Added column",
            ChunkKind::DeleteColumns { .. } => "Deleted columns",
            ChunkKind::RenameColumn { .. } => "Renamed column",
            ChunkKind::SetFormula { .. } => "Set formula",
            ChunkKind::ChangeDtype { .. } => "Changed dtype",
            ChunkKind::DuplicateDataframe { .. } => "Duplicated dataframe",
            ChunkKind::DeleteDataframe { .. } => "Deleted dataframe",
            ChunkKind::RenameDataframe { .. } => "Renamed dataframe",
            ChunkKind::Block { display_name, .. } => *display_name,
        }
    }

    /// One-line comment describing what the statements do.
    pub fn description(&self) -> String {
        match &self.kind {
            ChunkKind::AddColumn { df, header, .. } => format!("Added column {header} to {df}"),
            ChunkKind::DeleteColumns { df, headers, .. } => {
                format!("Deleted columns {} from {df}", headers.join(", "))
            }
            ChunkKind::RenameColumn {
                df,
                old_header,
                new_header,
                ..
            } => format!("Renamed {old_header} to {new_header} in {df}"),
            ChunkKind::SetFormula { df, header, .. } => {
                format!("Set formula of {header} in {df}")
            }
            ChunkKind::ChangeDtype { df, header, .. } => {
                format!("Changed {header} dtype in {df}")
            }
            ChunkKind::DuplicateDataframe {
                source_df, new_df, ..
            } => format!("Duplicated {source_df} as {new_df}"),
            ChunkKind::DeleteDataframe { df, .. } => format!("Deleted {df}"),
            ChunkKind::RenameDataframe {
                old_name, new_name, ..
            } => format!("Renamed {old_name} to {new_name}"),
            ChunkKind::Block { description, .. } => description.clone(),
        }
    }

    /// Statements in execution order.
    pub fn code(&self) -> Vec<String> {
        match &self.kind {
            ChunkKind::AddColumn {
                df,
                header,
                index,
                value,
                ..
            } => vec![format!(
                "{df}.insert({index}, {}, {})",
                py_str(header),
                value.as_deref().unwrap_or("0")
            )],
            ChunkKind::DeleteColumns { df, headers, .. } => vec![format!(
                "{df}.drop({}, axis=1, inplace=True)",
                py_str_list(headers)
            )],
            ChunkKind::RenameColumn {
                df,
                old_header,
                new_header,
                ..
            } => vec![format!(
                "{df}.rename(columns={{{}: {}}}, inplace=True)",
                py_str(old_header),
                py_str(new_header)
            )],
            ChunkKind::SetFormula {
                df, header, value, ..
            } => vec![format!("{df}[{}] = {value}", py_str(header))],
            ChunkKind::ChangeDtype { statements, .. } | ChunkKind::Block { statements, .. } => {
                statements.clone()
            }
            ChunkKind::DuplicateDataframe {
                source_df, new_df, ..
            } => vec![format!("{new_df} = {source_df}.copy(deep=True)")],
            ChunkKind::DeleteDataframe { df, .. } => vec![format!("del {df}")],
            ChunkKind::RenameDataframe {
                old_name, new_name, ..
            } => vec![format!("{new_name} = {old_name}"), format!("del {old_name}")],
        }
    }

    pub fn footprint(&self) -> Footprint {
        let var = |df: &str| Name::Variable(df.to_owned());
        let header = |sheet: &SheetId, header: &str| Name::Header(*sheet, header.to_owned());
        match &self.kind {
            ChunkKind::AddColumn {
                sheet,
                df,
                column_id,
                header: added,
                value_reads,
                ..
            } => Footprint::default()
                .read(*sheet, Columns::many(value_reads.iter().cloned()))
                .write(*sheet, Columns::one(column_id.clone()))
                .positional(*sheet)
                .uses(var(df))
                .binds(header(sheet, added)),
            ChunkKind::DeleteColumns {
                sheet,
                df,
                column_ids,
                headers,
            } => headers.iter().fold(
                Footprint::default()
                    .write(*sheet, Columns::many(column_ids.iter().cloned()))
                    .uses(var(df)),
                |footprint, dropped| footprint.binds(header(sheet, dropped)),
            ),
            ChunkKind::RenameColumn {
                sheet,
                df,
                column_id,
                old_header,
                new_header,
            } => Footprint::default()
                .write(*sheet, Columns::one(column_id.clone()))
                .uses(var(df))
                .binds(header(sheet, old_header))
                .binds(header(sheet, new_header)),
            ChunkKind::SetFormula {
                sheet,
                df,
                column_id,
                header: target,
                reads,
                ..
            } => Footprint::default()
                .read(*sheet, Columns::many(reads.iter().cloned()))
                .write(*sheet, Columns::one(column_id.clone()))
                .uses(var(df))
                .uses(header(sheet, target)),
            ChunkKind::ChangeDtype {
                sheet,
                df,
                column_id,
                header: target,
                ..
            } => Footprint::default()
                .read(*sheet, Columns::one(column_id.clone()))
                .write(*sheet, Columns::one(column_id.clone()))
                .uses(var(df))
                .uses(header(sheet, target)),
            ChunkKind::DuplicateDataframe {
                source,
                source_df,
                sheet,
                new_df,
            } => Footprint::default()
                .read(*source, Columns::All)
                .create(*sheet)
                .uses(var(source_df))
                .binds(var(new_df)),
            ChunkKind::DeleteDataframe { sheet, df } => {
                Footprint::default().delete(*sheet).binds(var(df))
            }
            ChunkKind::RenameDataframe {
                sheet,
                old_name,
                new_name,
            } => Footprint::default()
                .write(*sheet, Columns::All)
                .binds(var(old_name))
                .binds(var(new_name)),
            ChunkKind::Block {
                footprint, outputs, ..
            } => outputs
                .iter()
                .fold(footprint.clone(), |footprint, output| footprint.binds(var(&output.name))),
        }
    }

    /// Chunk can be removed when everything it produced is discarded later.
    pub fn is_droppable(&self) -> bool {
        !matches!(self.kind, ChunkKind::Block { keep: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(header: &str) -> CodeChunk {
        CodeChunk::new(
            "s1",
            ChunkKind::AddColumn {
                sheet: SheetId(0),
                df: "df1".to_owned(),
                column_id: ColumnId::from(header),
                header: header.to_owned(),
                index: 1,
                value: None,
                value_reads: Vec::new(),
            },
        )
    }

    #[test]
    fn test_add_column_code() {
        assert_eq!(add("B").code(), vec!["df1.insert(1, 'B', 0)".to_owned()]);
        assert_eq!(add("B").description(), "Added column B to df1");
    }

    #[test]
    fn test_rename_code_escapes_braces() {
        let chunk = CodeChunk::new(
            "s2",
            ChunkKind::RenameColumn {
                sheet: SheetId(0),
                df: "df1".to_owned(),
                column_id: ColumnId::from("B"),
                old_header: "B".to_owned(),
                new_header: "C".to_owned(),
            },
        );
        assert_eq!(
            chunk.code(),
            vec!["df1.rename(columns={'B': 'C'}, inplace=True)".to_owned()]
        );
    }

    #[test]
    fn test_footprints_conflict_on_shared_columns() {
        let b = add("B").footprint();
        let c = Footprint::default().write(SheetId(0), Columns::one(ColumnId::from("C")));
        assert!(!b.conflicts_with(&c));

        let sort = Footprint::default()
            .read(SheetId(0), Columns::one(ColumnId::from("C")))
            .write(SheetId(0), Columns::All);
        assert!(b.conflicts_with(&sort));
        assert!(sort.conflicts_with(&c));

        let other_sheet = Footprint::default().write(SheetId(1), Columns::All);
        assert!(!b.conflicts_with(&other_sheet));
    }

    #[test]
    fn test_inserts_on_one_sheet_conflict() {
        let b = add("B").footprint();
        let c = add("C").footprint();
        assert!(b.conflicts_with(&c));

        let elsewhere = Footprint::default()
            .write(SheetId(1), Columns::one(ColumnId::from("C")))
            .positional(SheetId(1));
        assert!(!b.conflicts_with(&elsewhere));
    }

    #[test]
    fn test_delete_dataframe_conflicts_with_everything_on_sheet() {
        let delete = CodeChunk::new(
            "s3",
            ChunkKind::DeleteDataframe {
                sheet: SheetId(0),
                df: "df1".to_owned(),
            },
        );
        assert!(delete.footprint().conflicts_with(&add("B").footprint()));
        assert_eq!(delete.code(), vec!["del df1".to_owned()]);
    }

    fn rename(column: &str, old: &str, new: &str) -> CodeChunk {
        CodeChunk::new(
            "s4",
            ChunkKind::RenameColumn {
                sheet: SheetId(0),
                df: "df1".to_owned(),
                column_id: ColumnId::from(column),
                old_header: old.to_owned(),
                new_header: new.to_owned(),
            },
        )
    }

    fn rename_df(sheet: u64, old: &str, new: &str) -> CodeChunk {
        CodeChunk::new(
            "s5",
            ChunkKind::RenameDataframe {
                sheet: SheetId(sheet),
                old_name: old.to_owned(),
                new_name: new.to_owned(),
            },
        )
    }

    #[test]
    fn test_renames_conflict_on_a_freed_header() {
        let a_to_t = rename("A", "A", "T").footprint();
        let b_to_a = rename("B", "B", "A").footprint();
        let c_to_d = rename("C", "C", "D").footprint();
        assert!(a_to_t.conflicts_with(&b_to_a));
        assert!(!a_to_t.conflicts_with(&c_to_d));
    }

    #[test]
    fn test_formulas_on_one_sheet_share_the_variable() {
        let formula = |column: &str| {
            CodeChunk::new(
                "s6",
                ChunkKind::SetFormula {
                    sheet: SheetId(0),
                    df: "df1".to_owned(),
                    column_id: ColumnId::from(column),
                    header: column.to_owned(),
                    value: "1".to_owned(),
                    reads: Vec::new(),
                },
            )
            .footprint()
        };
        assert!(!formula("B").conflicts_with(&formula("C")));
        assert!(formula("B").conflicts_with(&rename("X", "X", "B").footprint()));
    }

    #[test]
    fn test_sheet_renames_conflict_on_a_freed_variable() {
        let first = rename_df(0, "df1", "tmp").footprint();
        let second = rename_df(1, "df2", "df1").footprint();
        assert!(first.conflicts_with(&second));
        assert!(!first.conflicts_with(&rename_df(1, "df2", "sales").footprint()));
    }
}
