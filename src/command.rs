//! Command log: every chunk of source text submitted to coqtop, in order.
//!
//! The log is one vector split by `active_count`. The prefix holds the live
//! commands (index 0 is the root created by `Init`); the suffix holds
//! commands that were rewound or rejected, kept around only so their
//! diagnostic ranges can still be shown until messages are cleared.

use crate::error::{Error, Result};
use crate::messages::Span;
use crate::types::{EditId, StateId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A zero-based location in the source buffer.
///
/// `byte` is the byte offset within the line. Ordering and equality only look
/// at `(line, column)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, byte: usize) -> Self {
        Self { line, column, byte }
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        (self.line, self.column) == (other.line, other.column)
    }
}

impl Eq for Position {}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.line, self.column).cmp(&(other.line, other.column))
    }
}

/// Converts a byte offset into `text` (which starts at `start`) into an
/// absolute position. Offsets inside a UTF-8 sequence round down.
pub fn position_from_offset(start: Position, text: &str, offset: usize) -> Position {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &text[..offset];
    match before.rfind('\n') {
        None => Position {
            line: start.line,
            column: start.column + before.chars().count(),
            byte: start.byte + before.len(),
        },
        Some(newline) => {
            let last = &before[newline + 1..];
            Position {
                line: start.line + before.matches('\n').count(),
                column: last.chars().count(),
                byte: last.len(),
            }
        }
    }
}

/// Where a command is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    /// Added to coqtop, not yet checked.
    Sent,
    Processed,
    /// Will never be checked: its worker died or the `Add` was rejected.
    Abandoned,
    Reverted,
}

/// Worst diagnostic attached to a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    Warning,
    Error,
}

/// One submitted chunk of source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// `None` only for the root.
    pub edit_id: Option<EditId>,
    pub state_id: Option<StateId>,
    /// Exclusive end of the text this command covers.
    pub end: Position,
    pub state: CommandState,
    pub msg_type: Severity,
    /// Diagnostic range in bytes, relative to the command's own text.
    pub msg_offsets: Option<Span>,
    pub msg_start: Option<Position>,
    pub msg_stop: Option<Position>,
    /// Last worker reported to be processing this command.
    pub worker: Option<String>,
}

impl Command {
    fn new(edit_id: Option<EditId>, end: Position) -> Self {
        Self {
            edit_id,
            state_id: None,
            end,
            state: CommandState::Sent,
            msg_type: Severity::None,
            msg_offsets: None,
            msg_start: None,
            msg_stop: None,
            worker: None,
        }
    }

    /// Promote `Sent` to `Processed`; any other state is left alone.
    pub fn mark_processed(&mut self) -> bool {
        if self.state == CommandState::Sent {
            self.state = CommandState::Processed;
            true
        } else {
            false
        }
    }

    /// Records a diagnostic range; positions are recomputed on next use.
    pub fn set_diagnostic(&mut self, severity: Severity, loc: Option<Span>) {
        self.msg_type = severity;
        if loc.is_some() {
            self.msg_offsets = loc;
            self.msg_start = None;
            self.msg_stop = None;
        }
    }

    /// Resolves `msg_offsets` into `msg_start`/`msg_stop` once.
    ///
    /// `start` is where the command's text begins; `source` returns the
    /// buffer text between two positions.
    pub fn resolve_diagnostic<F>(&mut self, start: Position, source: &mut F)
    where
        F: FnMut(Position, Position) -> String,
    {
        let Some(span) = self.msg_offsets else {
            return;
        };
        if self.msg_start.is_some() && self.msg_stop.is_some() {
            return;
        }
        let text = source(start, self.end);
        self.msg_start = Some(position_from_offset(start, &text, span.start));
        self.msg_stop = Some(position_from_offset(start, &text, span.end));
    }
}

/// A half-open source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// Ranges an editor should paint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlights {
    /// Sent but not (or never going to be) checked.
    pub sent: Vec<Range>,
    pub checked: Vec<Range>,
    pub warnings: Vec<Range>,
    pub errors: Vec<Range>,
}

/// Ordered log of commands.
#[derive(Debug, Clone)]
pub struct CommandLog {
    commands: Vec<Command>,
    active: usize,
    next_edit: i64,
    /// Highest state id coqtop has handed out this session.
    newest_state: Option<StateId>,
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandLog {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            active: 0,
            next_edit: -1,
            newest_state: None,
        }
    }

    /// Replace the whole log with a single processed root at `state_id`.
    ///
    /// Edit ids keep decreasing across resets.
    pub fn reset(&mut self, state_id: StateId) {
        let mut root = Command::new(None, Position::default());
        root.state_id = Some(state_id);
        root.state = CommandState::Processed;
        self.commands = vec![root];
        self.active = 1;
        self.newest_state = Some(state_id);
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.active = 0;
        self.newest_state = None;
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn active(&self) -> &[Command] {
        &self.commands[..self.active]
    }

    pub fn reverted(&self) -> &[Command] {
        &self.commands[self.active..]
    }

    /// State id of the newest live command that coqtop has acknowledged.
    pub fn current_state_id(&self) -> Option<StateId> {
        self.active().iter().rev().find_map(|c| c.state_id)
    }

    /// True if coqtop has not yet acknowledged any command with `state_id`
    /// or a later one, rewound commands included.
    pub fn is_unseen_state(&self, state_id: StateId) -> bool {
        self.newest_state.is_none_or(|newest| state_id > newest)
    }

    pub fn last_end(&self) -> Option<Position> {
        self.active().last().map(|c| c.end)
    }

    /// Append a new `Sent` command to the live region.
    pub fn push(&mut self, end: Position) -> EditId {
        let edit_id = EditId(self.next_edit);
        self.next_edit -= 1;
        self.commands
            .insert(self.active, Command::new(Some(edit_id), end));
        self.active += 1;
        edit_id
    }

    /// Record the state id coqtop assigned to `edit_id`.
    pub fn confirm(&mut self, edit_id: EditId, state_id: StateId) -> bool {
        match self.index_of_edit(edit_id) {
            Some(idx) => {
                self.commands[idx].state_id = Some(state_id);
                self.newest_state = self.newest_state.max(Some(state_id));
                true
            }
            None => false,
        }
    }

    /// Mark a rejected command abandoned and move it out of the live region.
    pub fn abandon(&mut self, edit_id: EditId, loc: Option<Span>) {
        let Some(idx) = self.index_of_edit(edit_id) else {
            return;
        };
        let command = &mut self.commands[idx];
        command.state = CommandState::Abandoned;
        if loc.is_some() {
            command.set_diagnostic(Severity::Error, loc);
        }
        if idx < self.active {
            let command = self.commands.remove(idx);
            self.active -= 1;
            self.commands.insert(self.active, command);
        }
    }

    /// Revert the newest `steps` live commands and return the new current
    /// state id.
    pub fn rewind(&mut self, steps: usize, keep_history: bool) -> Result<StateId> {
        if steps == 0 || steps >= self.active {
            return Err(Error::InvalidRewind {
                steps,
                active: self.active,
            });
        }
        let new_active = self.active - steps;
        for command in &mut self.commands[new_active..self.active] {
            command.state = CommandState::Reverted;
        }
        if !keep_history {
            self.commands.drain(new_active..self.active);
        }
        self.active = new_active;
        self.current_state_id().ok_or(Error::NotRunning)
    }

    /// Forget the reverted history.
    pub fn clear_reverted(&mut self) {
        self.commands.truncate(self.active);
    }

    pub fn has_unchecked(&self) -> bool {
        self.active()
            .iter()
            .any(|c| c.state == CommandState::Sent)
    }

    /// Number of live commands that end after `pos`. The root never counts.
    pub fn steps_past(&self, pos: Position) -> usize {
        self.active()
            .iter()
            .skip(1)
            .filter(|c| c.end > pos)
            .count()
    }

    /// How many live commands to rewind so that `target` becomes current.
    ///
    /// Walks back from the tail while commands are newer than `target`
    /// (unacknowledged ones count as newer). If that walk does not land
    /// exactly on `target`, coqtop asked for a state this log cannot reach;
    /// the heuristic fallback then also rewinds everything past the
    /// contiguous processed prefix. Never includes the root.
    pub fn steps_to_revert(&self, target: StateId) -> usize {
        let active = self.active();
        if active.len() < 2 {
            return 0;
        }
        let mut count = 0;
        while count < active.len() - 1
            && active[active.len() - 1 - count]
                .state_id
                .map_or(true, |id| id > target)
        {
            count += 1;
        }
        if active[active.len() - 1 - count].state_id == Some(target) {
            return count;
        }
        let processed = active
            .iter()
            .take_while(|c| c.state == CommandState::Processed)
            .count()
            .max(1);
        count.max(active.len() - processed)
    }

    pub fn index_of_edit(&self, edit_id: EditId) -> Option<usize> {
        self.commands
            .iter()
            .position(|c| c.edit_id == Some(edit_id))
    }

    /// Copy diagnostic positions resolved on a snapshot of this log back
    /// into it. Commands whose diagnostic changed since the snapshot keep
    /// their unresolved state.
    pub fn store_resolved(&mut self, snapshot: &[Command]) {
        for done in snapshot.iter().skip(1) {
            let (Some(edit_id), Some(start), Some(stop)) =
                (done.edit_id, done.msg_start, done.msg_stop)
            else {
                continue;
            };
            let Some(idx) = self.index_of_edit(edit_id) else {
                continue;
            };
            let command = &mut self.commands[idx];
            if command.msg_offsets == done.msg_offsets && command.msg_start.is_none() {
                command.msg_start = Some(start);
                command.msg_stop = Some(stop);
            }
        }
    }

    pub(crate) fn active_index_of_state(&self, state_id: StateId) -> Option<usize> {
        self.active()
            .iter()
            .position(|c| c.state_id == Some(state_id))
    }

    pub(crate) fn active_index_of_edit(&self, edit_id: EditId) -> Option<usize> {
        self.active()
            .iter()
            .position(|c| c.edit_id == Some(edit_id))
    }

    /// Newest live command coqtop has not acknowledged yet.
    pub(crate) fn latest_unconfirmed(&self) -> Option<usize> {
        self.active()
            .iter()
            .rposition(|c| c.state_id.is_none())
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> Option<&mut Command> {
        self.commands.get_mut(idx)
    }

    pub(crate) fn active_mut(&mut self) -> &mut [Command] {
        &mut self.commands[..self.active]
    }

    /// Compute editor highlight ranges, resolving diagnostic offsets with
    /// `source` where needed.
    pub fn highlights<F>(&mut self, mut source: F) -> Highlights
    where
        F: FnMut(Position, Position) -> String,
    {
        let mut highlights = Highlights::default();
        let Some(root) = self.commands.first() else {
            return highlights;
        };
        let root_end = root.end;

        let mut prev_end = root_end;
        let mut sent_start: Option<Position> = None;
        let mut checked_start: Option<Position> = None;
        for command in &self.commands[1..self.active] {
            let sent = matches!(command.state, CommandState::Sent | CommandState::Abandoned);
            if sent {
                sent_start.get_or_insert(prev_end);
            } else if let Some(start) = sent_start.take() {
                highlights.sent.push(Range {
                    start,
                    end: prev_end,
                });
            }

            if command.state == CommandState::Processed {
                checked_start.get_or_insert(prev_end);
            } else if let Some(start) = checked_start.take() {
                highlights.checked.push(Range {
                    start,
                    end: prev_end,
                });
            }
            prev_end = command.end;
        }
        if let Some(start) = sent_start {
            highlights.sent.push(Range {
                start,
                end: prev_end,
            });
        }
        if let Some(start) = checked_start {
            highlights.checked.push(Range {
                start,
                end: prev_end,
            });
        }

        let mut prev_end = root_end;
        for command in self.commands.iter_mut().skip(1) {
            if command.msg_type != Severity::None {
                command.resolve_diagnostic(prev_end, &mut source);
                let range = match (command.msg_start, command.msg_stop) {
                    (Some(start), Some(end)) if start != end => Range { start, end },
                    _ => Range {
                        start: prev_end,
                        end: command.end,
                    },
                };
                match command.msg_type {
                    Severity::Warning => highlights.warnings.push(range),
                    Severity::Error => highlights.errors.push(range),
                    Severity::None => {}
                }
            }
            prev_end = command.end;
        }

        highlights
    }
}
