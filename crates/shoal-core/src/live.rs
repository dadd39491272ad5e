//! Live queries over committed changes.
//!
//! A [`LiveQuery`] tracks which rows of one entity match a filter and
//! classifies every [`Change`] against it, using the same evaluator as
//! in-memory finds.

use std::sync::Arc;

use shoal_proto::{EntityId, FilterExpr, Row};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::catalog::EntityDef;
use crate::error::Error;
use crate::filter::{prepare_option, FilterEvaluator, PreparedFilter};

/// A committed write.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Inserted { entity: String, row: Row },
    Updated { entity: String, before: Row, after: Row },
    Deleted { entity: String, row: Row },
}

impl Change {
    /// Name of the entity the change applies to.
    pub fn entity(&self) -> &str {
        match self {
            Change::Inserted { entity, .. }
            | Change::Updated { entity, .. }
            | Change::Deleted { entity, .. } => entity,
        }
    }
}

/// Effect of a change on a live query's result set.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// A row started matching.
    Entered(Row),
    /// A matching row changed and still matches.
    Changed(Row),
    /// A row stopped matching or was deleted.
    Left(EntityId),
    /// The change does not affect the result set.
    Ignored,
}

/// Filter subscription for one entity.
#[derive(Debug)]
pub struct LiveQuery {
    entity: Arc<EntityDef>,
    filter: PreparedFilter,
    members: Vec<EntityId>,
}

impl LiveQuery {
    /// Create a live query; `None` matches every row.
    pub fn new(entity: Arc<EntityDef>, filter: Option<&FilterExpr>) -> Result<Self, Error> {
        let filter = prepare_option(filter, &entity)?;
        Ok(Self {
            entity,
            filter,
            members: Vec::new(),
        })
    }

    /// Record the matching rows of an initial snapshot.
    pub fn seed<'a>(&mut self, rows: impl IntoIterator<Item = &'a Row>) -> Result<(), Error> {
        for row in rows {
            if self.matches(row) {
                let id = self.entity.id_of(row)?;
                self.insert_id(id);
            }
        }
        Ok(())
    }

    /// Check whether a row matches the filter.
    pub fn matches(&self, row: &Row) -> bool {
        FilterEvaluator::evaluate(&self.filter, &self.entity, row)
    }

    /// Ids of the rows currently matching.
    pub fn ids(&self) -> &[EntityId] {
        &self.members
    }

    /// Classify a change and update the tracked result set.
    pub fn apply(&mut self, change: &Change) -> Result<LiveEvent, Error> {
        if change.entity() != self.entity.name() {
            return Ok(LiveEvent::Ignored);
        }
        match change {
            Change::Inserted { row, .. } => {
                if !self.matches(row) {
                    return Ok(LiveEvent::Ignored);
                }
                self.insert_id(self.entity.id_of(row)?);
                Ok(LiveEvent::Entered(self.output(row)))
            }
            Change::Updated { before, after, .. } => {
                let old_id = self.entity.id_of(before)?;
                let new_id = self.entity.id_of(after)?;
                let was = self.remove_id(&old_id);
                if self.matches(after) {
                    self.insert_id(new_id);
                    let row = self.output(after);
                    Ok(if was { LiveEvent::Changed(row) } else { LiveEvent::Entered(row) })
                } else if was {
                    Ok(LiveEvent::Left(old_id))
                } else {
                    Ok(LiveEvent::Ignored)
                }
            }
            Change::Deleted { row, .. } => {
                let id = self.entity.id_of(row)?;
                Ok(if self.remove_id(&id) { LiveEvent::Left(id) } else { LiveEvent::Ignored })
            }
        }
    }

    /// Wait for the next change that affects the result set.
    ///
    /// Returns `None` once the channel is closed.
    pub async fn next_event(
        &mut self,
        changes: &mut broadcast::Receiver<Change>,
    ) -> Option<Result<LiveEvent, Error>> {
        loop {
            match changes.recv().await {
                Ok(change) => match self.apply(&change) {
                    Ok(LiveEvent::Ignored) => continue,
                    other => return Some(other),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(entity = %self.entity.name(), skipped, "Live query lagged behind");
                    return Some(Err(Error::Provider(format!(
                        "live query missed {skipped} changes"
                    ))));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn output(&self, row: &Row) -> Row {
        let mut row = row.clone();
        self.entity.apply_computed(&mut row);
        row
    }

    fn insert_id(&mut self, id: EntityId) {
        if !self.members.contains(&id) {
            self.members.push(id);
        }
    }

    fn remove_id(&mut self, id: &EntityId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != id);
        self.members.len() != before
    }
}
