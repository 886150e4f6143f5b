//! The step log of one session.
//!
//! The manager owns `(steps, current_index)`. Steps past the index form the
//! redo buffer until the next new edit truncates them. Every mutation is
//! built on the side and committed only once the new log, its states and its
//! script are all valid, so a failed edit leaves the session as it was.

use crate::config::EngineSettings;
use crate::error::{Result, SheetError};
use crate::optimizer::OptimizationReport;
use crate::saved_analysis::SavedAnalysis;
use crate::state::State;
use crate::steps::{Step, StepParams, StepType};
use crate::transpiler::Script;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// An edit as sent by the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEvent {
    #[serde(default = "default_event")]
    pub event: String,
    #[serde(default)]
    pub id: String,
    /// `<step_type>_edit`.
    #[serde(rename = "type")]
    pub edit_type: String,
    pub step_id: String,
    pub params: serde_json::Value,
}

fn default_event() -> String {
    "edit_event".to_owned()
}

impl EditEvent {
    pub fn new(step_type: StepType, params: serde_json::Value) -> Self {
        Self {
            event: default_event(),
            id: Uuid::new_v4().to_string(),
            edit_type: format!("{step_type}_edit"),
            step_id: Uuid::new_v4().to_string(),
            params,
        }
    }

    /// Typed params for this edit.
    ///
    /// # Errors
    ///
    /// `UnknownStep` for an edit type that names no step, `InvalidParams`
    /// when the params do not fit it.
    pub fn step_params(&self) -> Result<StepParams> {
        let step_type = self
            .edit_type
            .strip_suffix("_edit")
            .ok_or_else(|| SheetError::UnknownStep(self.edit_type.clone()))?;
        StepParams::from_parts(step_type, self.params.clone())
    }
}

/// Re-run `params` in order from `pre`, reusing the given step ids.
fn replay<I>(pre: &Arc<State>, steps: I) -> Result<Vec<Step>>
where
    I: IntoIterator<Item = (String, StepParams)>,
{
    let mut pre = Arc::clone(pre);
    let mut replayed = Vec::new();
    for (step_id, params) in steps {
        let step = Step::run(step_id, params, Arc::clone(&pre))?;
        pre = Arc::clone(&step.post_state);
        replayed.push(step);
    }
    Ok(replayed)
}

#[derive(Debug)]
pub struct StepsManager {
    settings: EngineSettings,
    initial_state: Arc<State>,
    steps: Vec<Step>,
    current_index: usize,
    script: Script,
}

impl StepsManager {
    /// Session over the named input dataframes, with settings loaded from
    /// the user's settings file.
    pub fn new(inputs: Vec<(String, DataFrame)>) -> Result<Self> {
        Self::with_settings(inputs, EngineSettings::load()?)
    }

    pub fn with_settings(inputs: Vec<(String, DataFrame)>, settings: EngineSettings) -> Result<Self> {
        let initial_state = Arc::new(State::from_inputs(inputs)?);
        let script = Script::build(&[], &initial_state, &settings)?;
        tracing::info!(sheets = initial_state.len(), "started session");
        Ok(Self {
            settings,
            initial_state,
            steps: Vec::new(),
            current_index: 0,
            script,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Applied steps, oldest first. Undone steps are not included.
    pub fn steps(&self) -> &[Step] {
        &self.steps[..self.current_index]
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Steps in the log, including any that are undone.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn initial_state(&self) -> &Arc<State> {
        &self.initial_state
    }

    pub fn current_state(&self) -> &Arc<State> {
        self.current_index
            .checked_sub(1)
            .and_then(|i| self.steps.get(i))
            .map_or(&self.initial_state, |step| &step.post_state)
    }

    /// Swap in a new log once its script builds.
    fn commit(&mut self, steps: Vec<Step>, current_index: usize) -> Result<()> {
        let active = &steps[..current_index.min(steps.len())];
        let final_state = active
            .last()
            .map_or(&self.initial_state, |step| &step.post_state);
        let script = Script::build(active, final_state, &self.settings)?;
        self.steps = steps;
        self.current_index = current_index;
        self.script = script;
        Ok(())
    }

    /// Apply an edit event from the front-end.
    pub fn handle_edit(&mut self, event: &EditEvent) -> Result<&Step> {
        let params = event.step_params()?;
        self.apply(event.step_id.clone(), params)
    }

    /// Apply `params` as a new step with a fresh id.
    pub fn push(&mut self, params: StepParams) -> Result<&Step> {
        self.apply(Uuid::new_v4().to_string(), params)
    }

    /// Apply `params` under `step_id`.
    ///
    /// When `step_id` is the last applied step, that step is re-run from its
    /// pre-state instead of stacking a new one. Otherwise undone steps are
    /// discarded and the new step is appended.
    ///
    /// # Errors
    ///
    /// Whatever the performer or the script build reports. The log is left
    /// untouched.
    pub fn apply(&mut self, step_id: String, params: StepParams) -> Result<&Step> {
        let step_type = params.step_type();
        let overwrite = self
            .steps()
            .last()
            .is_some_and(|last| last.step_id == step_id);
        let keep = if overwrite {
            self.current_index - 1
        } else {
            self.current_index
        };
        let pre = keep
            .checked_sub(1)
            .and_then(|i| self.steps.get(i))
            .map_or_else(|| Arc::clone(&self.initial_state), |s| Arc::clone(&s.post_state));

        let result = Step::run(step_id, params, pre).and_then(|step| {
            let mut steps = self.steps[..keep].to_vec();
            steps.push(step);
            self.commit(steps, keep + 1)
        });
        match result {
            Ok(()) => {
                let step = &self.steps[keep];
                tracing::info!(
                    step_type = %step_type,
                    step_id = %step.step_id,
                    overwrite,
                    elapsed_ms = step.execution_time.as_millis(),
                    "applied step"
                );
                Ok(step)
            }
            Err(e) => {
                tracing::warn!(step_type = %step_type, error = %e, "rejected edit");
                Err(e)
            }
        }
    }

    /// Step back one edit. At the start of the log this does nothing.
    pub fn undo(&mut self) -> Result<()> {
        if self.current_index == 0 {
            return Ok(());
        }
        self.commit(self.steps.clone(), self.current_index - 1)?;
        tracing::info!(current_index = self.current_index, "undo");
        Ok(())
    }

    /// Re-apply the next undone edit. With nothing to redo this does nothing.
    pub fn redo(&mut self) -> Result<()> {
        if self.current_index >= self.steps.len() {
            return Ok(());
        }
        self.commit(self.steps.clone(), self.current_index + 1)?;
        tracing::info!(current_index = self.current_index, "redo");
        Ok(())
    }

    /// Drop every edit except imports, which are re-run in log order against
    /// the initial state under their original ids.
    pub fn clear(&mut self) -> Result<()> {
        let imports: Vec<(String, StepParams)> = self
            .steps()
            .iter()
            .filter(|step| step.step_type().is_import())
            .map(|step| (step.step_id.clone(), step.params.clone()))
            .collect();
        let replayed = replay(&self.initial_state, imports)?;
        let count = replayed.len();
        self.commit(replayed, count)?;
        tracing::info!(imports = count, "cleared analysis");
        Ok(())
    }

    /// Replace the params of an applied step and re-run every later applied
    /// step. Undone steps are discarded.
    ///
    /// # Errors
    ///
    /// `InvalidParams` for an unknown `step_id`; otherwise the first failing
    /// step's error. Nothing changes on failure.
    pub fn edit_step(&mut self, step_id: &str, params: StepParams) -> Result<()> {
        let index = self
            .steps()
            .iter()
            .position(|step| step.step_id == step_id)
            .ok_or_else(|| SheetError::invalid_params(format!("no applied step with id {step_id}")))?;
        let pre = Arc::clone(&self.steps[index].pre_state);
        let mut rerun = vec![(step_id.to_owned(), params)];
        rerun.extend(
            self.steps()[index + 1..]
                .iter()
                .map(|step| (step.step_id.clone(), step.params.clone())),
        );
        let replayed = replay(&pre, rerun)?;
        let mut steps = self.steps[..index].to_vec();
        steps.extend(replayed);
        let count = steps.len();
        self.commit(steps, count)?;
        tracing::info!(step_id, rerun = count - index, "edited step");
        Ok(())
    }

    /// Replace the log with the steps of `analysis`, upgraded first.
    ///
    /// # Errors
    ///
    /// `Upgrade` when the analysis cannot be brought to the current schema,
    /// or the first failing step's error. Nothing changes on failure.
    pub fn load_analysis(&mut self, analysis: &SavedAnalysis) -> Result<()> {
        let upgraded = analysis.upgrade_for_inputs(self.initial_state.len())?;
        let params = upgraded.params()?;
        let replayed = replay(
            &self.initial_state,
            params
                .into_iter()
                .map(|p| (Uuid::new_v4().to_string(), p)),
        )?;
        let count = replayed.len();
        self.commit(replayed, count)?;
        tracing::info!(version = %analysis.version, steps = count, "loaded analysis");
        Ok(())
    }

    /// The applied steps as a saved analysis.
    pub fn saved_analysis(&self) -> Result<SavedAnalysis> {
        SavedAnalysis::from_steps(self.steps())
    }

    /// The generated script, one line per entry.
    pub fn transpiled_code(&self) -> Vec<String> {
        self.script.lines()
    }

    /// The generated script with a comment above each chunk.
    pub fn script(&self) -> String {
        self.script.commented()
    }

    pub fn optimization_report(&self) -> &OptimizationReport {
        self.script.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{AddColumnParams, DeleteColumnParams, RenameColumnParams};
    use polars::prelude::*;
    use pretty_assertions::assert_eq;

    fn session() -> StepsManager {
        let df = df!("A" => [1i64, 2, 3]).expect("df");
        StepsManager::with_settings(
            vec![("df1".to_owned(), df)],
            EngineSettings {
                verify_optimization: true,
                ..EngineSettings::default()
            },
        )
        .expect("manager")
    }

    fn add_column(header: &str) -> StepParams {
        StepParams::AddColumn(AddColumnParams {
            sheet_index: 0,
            column_header: header.to_owned(),
            column_header_index: -1,
        })
    }

    #[test]
    fn test_edit_appends_and_undo_redo_move_index() {
        let mut manager = session();
        manager.push(add_column("B")).expect("add B");
        manager.push(add_column("C")).expect("add C");
        assert_eq!(manager.current_state().sheets()[0].headers(), vec!["A", "B", "C"]);

        manager.undo().expect("undo");
        assert_eq!(manager.current_index(), 1);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.current_state().sheets()[0].headers(), vec!["A", "B"]);

        manager.redo().expect("redo");
        assert_eq!(manager.current_state().sheets()[0].headers(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_undo_and_redo_clamp() {
        let mut manager = session();
        manager.undo().expect("undo on empty");
        assert_eq!(manager.current_index(), 0);
        manager.push(add_column("B")).expect("add");
        manager.redo().expect("redo at end");
        assert_eq!(manager.current_index(), 1);
    }

    #[test]
    fn test_new_edit_after_undo_truncates() {
        let mut manager = session();
        manager.push(add_column("B")).expect("add B");
        manager.push(add_column("C")).expect("add C");
        manager.undo().expect("undo");
        manager.push(add_column("D")).expect("add D");
        assert_eq!(manager.len(), 2);
        manager.redo().expect("redo");
        assert_eq!(manager.current_state().sheets()[0].headers(), vec!["A", "B", "D"]);
    }

    #[test]
    fn test_same_step_id_overwrites() {
        let mut manager = session();
        manager.apply("s1".to_owned(), add_column("B")).expect("add B");
        manager.apply("s1".to_owned(), add_column("X")).expect("overwrite");
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.current_state().sheets()[0].headers(), vec!["A", "X"]);
    }

    #[test]
    fn test_failed_edit_leaves_log_untouched() {
        let mut manager = session();
        manager.push(add_column("B")).expect("add B");
        let before = manager.transpiled_code();
        let err = manager
            .push(StepParams::DeleteColumn(DeleteColumnParams {
                sheet_index: 0,
                column_ids: vec!["missing".into()],
            }))
            .unwrap_err();
        assert_eq!(err.error_kind(), "invalid_params");
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.transpiled_code(), before);
    }

    #[test]
    fn test_handle_edit_event() {
        let mut manager = session();
        let event = EditEvent::new(
            StepType::AddColumn,
            serde_json::json!({"sheet_index": 0, "column_header": "B", "column_header_index": -1}),
        );
        let step = manager.handle_edit(&event).expect("edit");
        assert_eq!(step.step_id, event.step_id);

        let bad = EditEvent {
            edit_type: "teleport_edit".to_owned(),
            ..event
        };
        assert_eq!(manager.handle_edit(&bad).unwrap_err().error_kind(), "unknown_step");
    }

    #[test]
    fn test_edit_step_reruns_later_steps() {
        let mut manager = session();
        manager.apply("add".to_owned(), add_column("B")).expect("add B");
        manager.push(add_column("C")).expect("add C");
        manager
            .edit_step(
                "add",
                StepParams::AddColumn(AddColumnParams {
                    sheet_index: 0,
                    column_header: "B".to_owned(),
                    column_header_index: 0,
                }),
            )
            .expect("edit");
        assert_eq!(manager.current_state().sheets()[0].headers(), vec!["B", "A", "C"]);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_edit_step_that_breaks_later_steps_is_rejected() {
        let mut manager = session();
        manager.apply("add".to_owned(), add_column("B")).expect("add");
        manager
            .push(StepParams::RenameColumn(RenameColumnParams {
                sheet_index: 0,
                column_id: "B".into(),
                new_column_header: "Renamed".to_owned(),
            }))
            .expect("rename");
        assert!(manager.edit_step("add", add_column("Z")).is_err());
        assert_eq!(manager.current_state().sheets()[0].headers(), vec!["A", "Renamed"]);
    }

    #[test]
    fn test_edit_step_failure_changes_nothing() {
        let mut manager = session();
        manager.apply("add".to_owned(), add_column("B")).expect("add");
        let before = manager.current_state().sheets()[0].headers();
        let err = manager.edit_step("nope", add_column("Z")).unwrap_err();
        assert_eq!(err.error_kind(), "invalid_params");
        assert_eq!(manager.current_state().sheets()[0].headers(), before);
    }

    #[test]
    fn test_saved_analysis_round_trip() {
        let mut manager = session();
        manager.push(add_column("B")).expect("add");
        let analysis = manager.saved_analysis().expect("analysis");

        let mut other = session();
        other.load_analysis(&analysis).expect("load");
        assert_eq!(other.transpiled_code(), manager.transpiled_code());
    }
}
