//! In-memory remote authority
//!
//! Durable state kept in process, with failure injection and a call log.
//! Order writes are validated against durable state: an order that does not
//! describe exactly the stored items is rejected as a conflict.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use taskboard_model::{Board, Entity, EntityKind, FieldMap, FieldName, Identifier, Section, Task};
use taskboard_sync::{
    AuthorityError, CreateRequest, EntityRef, OrderAck, OrderRequest, Record, RemoteAuthority,
    Scope, TransferRequest,
};
use tracing::debug;

/// Authority operation, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Fetch,
    FetchBoard,
    PersistOrder,
    Create,
    Update,
    Delete,
}

/// Recorded call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Fetch(Scope),
    FetchBoard(Identifier),
    PersistOrder(OrderRequest),
    Create(CreateRequest),
    Update(EntityRef, FieldMap),
    Delete(EntityRef),
}

impl Call {
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Fetch(_) => Operation::Fetch,
            Self::FetchBoard(_) => Operation::FetchBoard,
            Self::PersistOrder(_) => Operation::PersistOrder,
            Self::Create(_) => Operation::Create,
            Self::Update(..) => Operation::Update,
            Self::Delete(_) => Operation::Delete,
        }
    }
}

#[derive(Debug, Default)]
struct FailurePlan {
    queued: HashMap<Operation, VecDeque<AuthorityError>>,
    every: HashMap<Operation, (u64, AuthorityError)>,
    seen: HashMap<Operation, u64>,
}

impl FailurePlan {
    fn next(&mut self, op: Operation) -> Option<AuthorityError> {
        let seen = self.seen.entry(op).or_insert(0);
        *seen += 1;
        let count = *seen;

        if let Some(err) = self.queued.get_mut(&op).and_then(VecDeque::pop_front) {
            return Some(err);
        }
        match self.every.get(&op) {
            Some((n, err)) if *n > 0 && count % n == 0 => Some(err.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Durable {
    boards: Vec<Board>,
    favourites: Vec<Identifier>,
    sections: HashMap<Identifier, Vec<Section>>,
    tasks: HashMap<Identifier, Vec<Task>>,
}

impl Durable {
    fn board_mut(&mut self, id: &Identifier) -> Result<&mut Board, AuthorityError> {
        self.boards
            .iter_mut()
            .find(|b| &b.id == id)
            .ok_or_else(|| not_found(id))
    }

    fn sections_of(&mut self, board: &Identifier) -> Result<&mut Vec<Section>, AuthorityError> {
        self.sections.get_mut(board).ok_or_else(|| not_found(board))
    }

    fn tasks_of(&mut self, section: &Identifier) -> Result<&mut Vec<Task>, AuthorityError> {
        self.tasks.get_mut(section).ok_or_else(|| not_found(section))
    }

    fn section_board(&self, section: &Identifier) -> Option<&Identifier> {
        self.sections
            .iter()
            .find(|(_, sections)| sections.iter().any(|s| &s.id == section))
            .map(|(board, _)| board)
    }

    fn task_section(&self, task: &Identifier) -> Option<Identifier> {
        self.tasks
            .iter()
            .find(|(_, tasks)| tasks.iter().any(|t| &t.id == task))
            .map(|(section, _)| section.clone())
    }

    fn favourite_boards(&self) -> Vec<Board> {
        self.favourites
            .iter()
            .filter_map(|id| self.boards.iter().find(|b| &b.id == id).cloned())
            .collect()
    }

    fn set_favourite(&mut self, id: &Identifier, favourite: bool) {
        let listed = self.favourites.contains(id);
        if favourite && !listed {
            self.favourites.insert(0, id.clone());
        } else if !favourite && listed {
            self.favourites.retain(|f| f != id);
        }
    }

    fn board_detail(&self, id: &Identifier) -> Result<Value, AuthorityError> {
        let board = self
            .boards
            .iter()
            .find(|b| &b.id == id)
            .ok_or_else(|| not_found(id))?;
        let sections: Vec<Value> = self
            .sections
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|section| {
                let tasks = self.tasks.get(&section.id).cloned().unwrap_or_default();
                let mut record = to_record(section);
                record["tasks"] = to_record(&tasks);
                record
            })
            .collect();

        let mut record = to_record(board);
        record["sections"] = Value::Array(sections);
        Ok(record)
    }
}

/// [`RemoteAuthority`] backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryAuthority {
    durable: Mutex<Durable>,
    failures: Mutex<FailurePlan>,
    calls: Mutex<Vec<Call>>,
    latency: Option<Duration>,
}

impl InMemoryAuthority {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seed a board at the end of the board list
    #[must_use]
    pub fn with_board(self, board: Board) -> Self {
        {
            let mut durable = self.durable.lock();
            if board.favourite {
                durable.favourites.push(board.id.clone());
            }
            durable.sections.entry(board.id.clone()).or_default();
            durable.boards.push(board);
        }
        self
    }

    /// Seed a section at the end of a board
    #[must_use]
    pub fn with_section(self, board: &Identifier, section: Section) -> Self {
        {
            let mut durable = self.durable.lock();
            durable.tasks.entry(section.id.clone()).or_default();
            durable.sections.entry(board.clone()).or_default().push(section);
        }
        self
    }

    /// Seed a task at the end of a section
    #[must_use]
    pub fn with_task(self, section: &Identifier, task: Task) -> Self {
        self.durable
            .lock()
            .tasks
            .entry(section.clone())
            .or_default()
            .push(task);
        self
    }

    /// Fail the next call of `op` with `error`
    pub fn fail_next(&self, op: Operation, error: AuthorityError) {
        self.failures
            .lock()
            .queued
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail every `n`th call of `op` (0 disables)
    pub fn fail_every(&self, op: Operation, n: u64, error: AuthorityError) {
        self.failures.lock().every.insert(op, (n, error));
    }

    /// Every call received, in order
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Number of calls of one operation
    #[must_use]
    pub fn call_count(&self, op: Operation) -> usize {
        self.calls.lock().iter().filter(|c| c.operation() == op).count()
    }

    /// Order writes received, in order
    #[must_use]
    pub fn order_writes(&self) -> Vec<OrderRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::PersistOrder(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Durable board order
    #[must_use]
    pub fn board_order(&self) -> Vec<Identifier> {
        self.durable.lock().boards.iter().map(|b| b.id.clone()).collect()
    }

    /// Durable favourites order
    #[must_use]
    pub fn favourite_order(&self) -> Vec<Identifier> {
        self.durable.lock().favourites.clone()
    }

    /// Durable section order of a board
    #[must_use]
    pub fn section_order(&self, board: &Identifier) -> Vec<Identifier> {
        self.durable
            .lock()
            .sections
            .get(board)
            .map(|sections| sections.iter().map(|s| s.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Durable task order of a section
    #[must_use]
    pub fn task_order(&self, section: &Identifier) -> Vec<Identifier> {
        self.durable
            .lock()
            .tasks
            .get(section)
            .map(|tasks| tasks.iter().map(|t| t.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Durable value of a board
    #[must_use]
    pub fn board(&self, id: &Identifier) -> Option<Board> {
        self.durable.lock().boards.iter().find(|b| &b.id == id).cloned()
    }

    /// Durable value of a task
    #[must_use]
    pub fn task(&self, id: &Identifier) -> Option<Task> {
        self.durable
            .lock()
            .tasks
            .values()
            .flatten()
            .find(|t| &t.id == id)
            .cloned()
    }

    async fn enter(&self, call: Call) -> Result<(), AuthorityError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let op = call.operation();
        debug!(?op, "authority call");
        self.calls.lock().push(call);
        match self.failures.lock().next(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteAuthority for InMemoryAuthority {
    async fn fetch(&self, scope: Scope) -> Result<Vec<Record>, AuthorityError> {
        self.enter(Call::Fetch(scope.clone())).await?;
        let durable = self.durable.lock();
        let records = match &scope {
            Scope::Boards => durable.boards.iter().map(to_record).collect(),
            Scope::Favourites => durable.favourite_boards().iter().map(to_record).collect(),
            Scope::Sections { board } => durable
                .sections
                .get(board)
                .ok_or_else(|| not_found(board))?
                .iter()
                .map(to_record)
                .collect(),
            Scope::Tasks { section, .. } => durable
                .tasks
                .get(section)
                .ok_or_else(|| not_found(section))?
                .iter()
                .map(to_record)
                .collect(),
        };
        Ok(records)
    }

    async fn fetch_board(&self, board: Identifier) -> Result<Record, AuthorityError> {
        self.enter(Call::FetchBoard(board.clone())).await?;
        self.durable.lock().board_detail(&board)
    }

    async fn persist_order(&self, request: OrderRequest) -> Result<OrderAck, AuthorityError> {
        self.enter(Call::PersistOrder(request.clone())).await?;
        let mut durable = self.durable.lock();
        match &request {
            OrderRequest::Reorder { scope, order, .. } => match scope {
                Scope::Boards => reorder(&mut durable.boards, order, "boards")?,
                Scope::Favourites => {
                    if !same_items(&durable.favourites, order) {
                        return Err(AuthorityError::Conflict("favourites changed".into()));
                    }
                    durable.favourites = order.clone();
                }
                Scope::Sections { board } => reorder(durable.sections_of(board)?, order, "sections")?,
                Scope::Tasks { section, .. } => reorder(durable.tasks_of(section)?, order, "tasks")?,
            },
            OrderRequest::Transfer(transfer) => apply_transfer(&mut durable, transfer)?,
        }
        Ok(OrderAck::echo(&request))
    }

    async fn create(&self, request: CreateRequest) -> Result<Record, AuthorityError> {
        self.enter(Call::Create(request.clone())).await?;
        let id = Identifier::new(uuid::Uuid::new_v4().to_string());
        let mut durable = self.durable.lock();

        let record = match request.kind {
            EntityKind::Board => {
                let mut board = Board::new(id.clone());
                apply(&mut board, &request.seed)?;
                durable.sections.insert(id.clone(), Vec::new());
                if board.favourite {
                    durable.set_favourite(&id, true);
                }
                let record = to_record(&board);
                durable.boards.insert(0, board);
                record
            }
            EntityKind::Section => {
                let board = request
                    .board
                    .ok_or_else(|| AuthorityError::invalid_field(FieldName::new("boardId"), "missing board"))?;
                let mut section = Section::new(id.clone());
                apply(&mut section, &request.seed)?;
                let record = to_record(&section);
                durable.sections_of(&board)?.push(section);
                durable.tasks.insert(id, Vec::new());
                record
            }
            EntityKind::Task => {
                let section = request
                    .section
                    .ok_or_else(|| AuthorityError::invalid_field(FieldName::new("sectionId"), "missing section"))?;
                let mut task = Task::new(id);
                apply(&mut task, &request.seed)?;
                let record = to_record(&task);
                durable.tasks_of(&section)?.insert(0, task);
                record
            }
        };
        Ok(record)
    }

    async fn update(&self, target: EntityRef, fields: FieldMap) -> Result<Record, AuthorityError> {
        self.enter(Call::Update(target.clone(), fields.clone())).await?;
        let mut durable = self.durable.lock();

        match target.kind {
            EntityKind::Board => {
                let board = durable.board_mut(&target.id)?;
                apply(board, &fields)?;
                let (favourite, record) = (board.favourite, to_record(&*board));
                if fields.get(&FieldName::FAVOURITE).is_some() {
                    durable.set_favourite(&target.id, favourite);
                }
                Ok(record)
            }
            EntityKind::Section => {
                let section = durable
                    .sections
                    .values_mut()
                    .flatten()
                    .find(|s| s.id == target.id)
                    .ok_or_else(|| not_found(&target.id))?;
                apply(section, &fields)?;
                Ok(to_record(&*section))
            }
            EntityKind::Task => {
                let task = durable
                    .tasks
                    .values_mut()
                    .flatten()
                    .find(|t| t.id == target.id)
                    .ok_or_else(|| not_found(&target.id))?;
                apply(task, &fields)?;
                Ok(to_record(&*task))
            }
        }
    }

    async fn delete(&self, target: EntityRef) -> Result<(), AuthorityError> {
        self.enter(Call::Delete(target.clone())).await?;
        let mut durable = self.durable.lock();
        let id = &target.id;

        match target.kind {
            EntityKind::Board => {
                let before = durable.boards.len();
                durable.boards.retain(|b| &b.id != id);
                if durable.boards.len() == before {
                    return Err(not_found(id));
                }
                durable.favourites.retain(|f| f != id);
                for section in durable.sections.remove(id).unwrap_or_default() {
                    durable.tasks.remove(&section.id);
                }
            }
            EntityKind::Section => {
                let board = durable.section_board(id).cloned().ok_or_else(|| not_found(id))?;
                durable.sections_of(&board)?.retain(|s| &s.id != id);
                durable.tasks.remove(id);
            }
            EntityKind::Task => {
                let section = durable.task_section(id).ok_or_else(|| not_found(id))?;
                durable.tasks_of(&section)?.retain(|t| &t.id != id);
            }
        }
        Ok(())
    }
}

fn to_record<T: serde::Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| json!({}))
}

fn not_found(id: &Identifier) -> AuthorityError {
    AuthorityError::NotFound(id.to_string())
}

fn apply<T: Entity>(entity: &mut T, fields: &FieldMap) -> Result<(), AuthorityError> {
    entity
        .apply_fields(fields)
        .map_err(|err| AuthorityError::validation(err.to_string()))
}

fn same_items(current: &[Identifier], order: &[Identifier]) -> bool {
    let current: HashSet<&Identifier> = current.iter().collect();
    let wanted: HashSet<&Identifier> = order.iter().collect();
    current.len() == order.len() && current == wanted
}

fn reorder<T: Entity>(items: &mut Vec<T>, order: &[Identifier], what: &str) -> Result<(), AuthorityError> {
    let ids: Vec<Identifier> = items.iter().map(|item| item.id().clone()).collect();
    if !same_items(&ids, order) {
        return Err(AuthorityError::Conflict(format!("{what} changed")));
    }
    let mut by_id: HashMap<Identifier, T> = items.drain(..).map(|item| (item.id().clone(), item)).collect();
    items.extend(order.iter().filter_map(|id| by_id.remove(id)));
    Ok(())
}

fn apply_transfer(durable: &mut Durable, transfer: &TransferRequest) -> Result<(), AuthorityError> {
    let source = transfer.source.as_owner();
    let destination = transfer.destination.as_owner();
    let mut pool: HashMap<Identifier, Task> = HashMap::new();
    for section in [&source, &destination] {
        pool.extend(
            durable
                .tasks_of(section)?
                .iter()
                .map(|t| (t.id.clone(), t.clone())),
        );
    }

    let wanted: Vec<Identifier> = transfer
        .source_order
        .iter()
        .chain(&transfer.destination_order)
        .cloned()
        .collect();
    let pooled: Vec<Identifier> = pool.keys().cloned().collect();
    if !same_items(&pooled, &wanted) || !transfer.destination_order.contains(&transfer.moved) {
        return Err(AuthorityError::Conflict("tasks changed".into()));
    }

    let take = |order: &[Identifier], pool: &mut HashMap<Identifier, Task>| -> Vec<Task> {
        order.iter().filter_map(|id| pool.remove(id)).collect()
    };
    let source_tasks = take(&transfer.source_order, &mut pool);
    let destination_tasks = take(&transfer.destination_order, &mut pool);
    *durable.tasks_of(&source)? = source_tasks;
    *durable.tasks_of(&destination)? = destination_tasks;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use taskboard_model::CollectionId;

    fn ids(items: &[&str]) -> Vec<Identifier> {
        items.iter().map(|id| Identifier::from(*id)).collect()
    }

    fn authority() -> InMemoryAuthority {
        InMemoryAuthority::new()
            .with_board(Board::new("a".into()))
            .with_board(Board::new("b".into()).favourited())
            .with_section(&"a".into(), Section::new("s1".into()))
            .with_section(&"a".into(), Section::new("s2".into()))
            .with_task(&"s1".into(), Task::new("A".into()))
            .with_task(&"s1".into(), Task::new("B".into()))
            .with_task(&"s2".into(), Task::new("X".into()))
    }

    #[tokio::test]
    async fn reorder_rejects_stale_orders() {
        let auth = authority();
        let err = auth
            .persist_order(OrderRequest::Reorder {
                scope: Scope::Boards,
                collection: CollectionId::boards(),
                order: ids(&["b"]),
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        auth.persist_order(OrderRequest::Reorder {
            scope: Scope::Boards,
            collection: CollectionId::boards(),
            order: ids(&["b", "a"]),
        })
        .await
        .unwrap();
        assert_eq!(auth.board_order(), ids(&["b", "a"]));
    }

    #[tokio::test]
    async fn transfer_moves_task() {
        let auth = authority();
        auth.persist_order(OrderRequest::Transfer(TransferRequest {
            board: "a".into(),
            moved: "A".into(),
            source: "s1".into(),
            source_order: ids(&["B"]),
            destination: "s2".into(),
            destination_order: ids(&["X", "A"]),
        }))
        .await
        .unwrap();

        assert_eq!(auth.task_order(&"s1".into()), ids(&["B"]));
        assert_eq!(auth.task_order(&"s2".into()), ids(&["X", "A"]));
    }

    #[tokio::test]
    async fn favourite_update_maintains_favourites() {
        let auth = authority();
        auth.update(EntityRef::board("a".into()), FieldMap::single(FieldName::FAVOURITE, true))
            .await
            .unwrap();
        assert_eq!(auth.favourite_order(), ids(&["a", "b"]));

        auth.update(EntityRef::board("b".into()), FieldMap::single(FieldName::FAVOURITE, false))
            .await
            .unwrap();
        assert_eq!(auth.favourite_order(), ids(&["a"]));
    }

    #[tokio::test]
    async fn board_detail_nests_sections_and_tasks() {
        let auth = authority();
        let record = auth.fetch_board("a".into()).await.unwrap();
        let detail: taskboard_model::BoardDetail = serde_json::from_value(record).unwrap();
        assert_eq!(detail.sections.len(), 2);
        assert_eq!(detail.sections[0].tasks.len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let auth = authority();
        auth.fail_next(Operation::Fetch, AuthorityError::Unauthorized);

        assert_eq!(auth.fetch(Scope::Boards).await.unwrap_err(), AuthorityError::Unauthorized);
        assert_eq!(auth.fetch(Scope::Boards).await.unwrap().len(), 2);
        assert_eq!(auth.call_count(Operation::Fetch), 2);
    }

    #[tokio::test]
    async fn periodic_failures() {
        let auth = authority();
        auth.fail_every(Operation::Update, 2, AuthorityError::transient("flaky"));
        let target = EntityRef::board("a".into());

        assert!(auth.update(target.clone(), FieldMap::new()).await.is_ok());
        assert!(auth.update(target.clone(), FieldMap::new()).await.is_err());
        assert!(auth.update(target, FieldMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn deleting_a_board_drops_everything_under_it() {
        let auth = authority();
        auth.delete(EntityRef::board("a".into())).await.unwrap();

        assert_eq!(auth.board_order(), ids(&["b"]));
        assert!(auth.task(&"A".into()).is_none());
        let err = auth.delete(EntityRef::board("a".into())).await.unwrap_err();
        assert!(matches!(err, AuthorityError::NotFound(_)));
    }

    #[tokio::test]
    async fn created_tasks_go_to_the_front() {
        let auth = authority();
        let record = auth
            .create(CreateRequest {
                kind: EntityKind::Task,
                board: Some("a".into()),
                section: Some("s2".into()),
                seed: FieldMap::single(FieldName::TITLE, "New"),
            })
            .await
            .unwrap();

        let id = Identifier::from(record["id"].as_str().unwrap());
        assert_eq!(auth.task_order(&"s2".into())[0], id);
        assert_eq!(auth.task(&id).unwrap().title, "New");
    }
}
