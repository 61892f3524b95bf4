use super::definition::SagaDefinition;
use super::effect::{SagaEffect, SagaTransition};
use super::instance::{PersistedSagaInstance, SagaInstance};
use super::{Result, SagaError, SagaPersistMode};
use crate::core::{AnyAction, StateModel};
use crate::middleware::{Middleware, Next};
use crate::storage::{SagaStorage, StorageError};
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

type StorageErrorHandler = Arc<dyn Fn(&StorageError) + Send + Sync>;

/// The saga engine: registry of definitions plus the live instance table.
///
/// Constructed once by the store builder; read-only apart from the
/// instance table, which is guarded by a single mutex because multiple
/// actions may be in flight concurrently.
pub struct SagaEngine {
    definitions: Vec<SagaDefinition>,
    instances: tokio::sync::Mutex<HashMap<String, SagaInstance>>,
    storage: Option<Arc<dyn SagaStorage>>,
    mode: SagaPersistMode,
    on_storage_error: StorageErrorHandler,
    /// Per-instance generation counters for debounced saves: a scheduled
    /// save only fires if its generation is still current when the delay
    /// elapses.
    debounce: Mutex<HashMap<String, u64>>,
}

impl SagaEngine {
    pub fn new(definitions: Vec<SagaDefinition>) -> Self {
        Self {
            definitions,
            instances: tokio::sync::Mutex::new(HashMap::new()),
            storage: None,
            mode: SagaPersistMode::OnEveryChange,
            on_storage_error: Arc::new(|e| error!(error = %e, "saga storage operation failed")),
            debounce: Mutex::new(HashMap::new()),
        }
    }

    /// Attaches a storage backend and persistence mode.
    pub fn with_storage(mut self, storage: Arc<dyn SagaStorage>, mode: SagaPersistMode) -> Self {
        self.storage = Some(storage);
        self.mode = mode;
        self
    }

    /// Replaces the storage error handler (default: log at error level).
    pub fn with_storage_error_handler(
        mut self,
        handler: impl Fn(&StorageError) + Send + Sync + 'static,
    ) -> Self {
        self.on_storage_error = Arc::new(handler);
        self
    }

    fn definition(&self, name: &str) -> Option<&SagaDefinition> {
        self.definitions.iter().find(|d| d.name() == name)
    }

    /// Number of active instances.
    pub async fn active_count(&self) -> usize {
        self.instances.lock().await.len()
    }

    /// Ids of all active instances.
    pub async fn active_ids(&self) -> Vec<String> {
        self.instances.lock().await.keys().cloned().collect()
    }

    /// Reads a piece of an active instance under the table lock.
    pub async fn with_instance<R>(
        &self,
        id: &str,
        f: impl FnOnce(&SagaInstance) -> R,
    ) -> Option<R> {
        self.instances.lock().await.get(id).map(f)
    }

    /// Explicitly persists one active instance.
    ///
    /// This is the only trigger under [`SagaPersistMode::OnCheckpoint`];
    /// it also works under any other mode when a backend is configured.
    pub async fn checkpoint(&self, id: &str) -> Result<()> {
        let Some(storage) = &self.storage else {
            debug!(id, "checkpoint ignored: no saga storage configured");
            return Ok(());
        };
        let record = {
            let table = self.instances.lock().await;
            let instance = table
                .get(id)
                .ok_or_else(|| SagaError::Handler(format!("no active instance {id}")))?;
            let def = self
                .definition(instance.name())
                .ok_or_else(|| SagaError::UnknownDefinition(instance.name().to_string()))?;
            encode_instance(def, instance)?
        };
        storage.save(&record.id, &record).await?;
        Ok(())
    }

    /// Loads all persisted instances into the table.
    ///
    /// Called by the store builder before the store processes any action.
    /// Instances whose definition or codec is missing are skipped with a
    /// warning rather than failing rehydration wholesale.
    pub async fn rehydrate(&self) -> Result<usize> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };
        let ids = storage.all_ids().await?;
        let mut table = self.instances.lock().await;
        let mut restored = 0;
        for id in ids {
            let Some(record) = storage.load(&id).await? else {
                continue;
            };
            let Some(def) = self.definition(&record.name) else {
                warn!(saga = %record.name, id = %record.id, "skipping persisted instance: unknown definition");
                continue;
            };
            let Some(codec) = def.codec() else {
                warn!(saga = %record.name, id = %record.id, "skipping persisted instance: no state codec");
                continue;
            };
            match (codec.decode)(&record.state) {
                Ok(state) => {
                    table.insert(
                        record.id.clone(),
                        SagaInstance::rehydrated(
                            record.id,
                            record.name,
                            state,
                            record.created_at,
                            record.updated_at,
                        ),
                    );
                    restored += 1;
                }
                Err(e) => {
                    error!(saga = %record.name, id = %record.id, error = %e, "failed to decode persisted instance");
                }
            }
        }
        debug!(restored, "saga rehydration finished");
        Ok(restored)
    }

    /// Runs one action through every registered saga.
    ///
    /// Start handlers are evaluated against the definitions and running
    /// handlers against the instances active *before* this action; a
    /// just-started instance never sees the action that started it.
    pub(crate) async fn process<S: StateModel>(self: Arc<Self>, store: &Store<S>, action: &AnyAction) {
        let mut batches: Vec<(String, Vec<SagaEffect>)> = Vec::new();
        let mut saves: Vec<PersistedSagaInstance> = Vec::new();
        let mut debounced: Vec<String> = Vec::new();
        let mut removals: Vec<String> = Vec::new();

        {
            let mut table = self.instances.lock().await;

            let active: Vec<String> = table.keys().cloned().collect();
            for id in active {
                let Some(instance) = table.get(&id) else {
                    continue;
                };
                let Some(def) = self.definition(instance.name()) else {
                    warn!(saga = instance.name(), id = %id, "active instance has no definition");
                    continue;
                };
                match def.evaluate_running(action, &instance.state) {
                    None => {}
                    Some(Ok(SagaTransition::Continue { state, effects })) => {
                        let instance = table.get_mut(&id).expect("instance vanished under lock");
                        instance.state = state;
                        instance.updated_at = Utc::now();
                        debug!(saga = instance.name(), id = %id, "saga advanced");
                        self.queue_save(def, instance, &mut saves, &mut debounced);
                        batches.push((def.name().to_string(), effects));
                    }
                    Some(Ok(SagaTransition::Complete { effects })) => {
                        table.remove(&id);
                        debug!(saga = def.name(), id = %id, "saga completed");
                        removals.push(id.clone());
                        batches.push((def.name().to_string(), effects));
                    }
                    Some(Err(e)) => {
                        error!(saga = def.name(), id = %id, error = %e, "saga handler failed");
                        store.logger().error(
                            "saga {name} handler failed for {id}: {error}",
                            &[&def.name(), &id, &e],
                        );
                    }
                }
            }

            for def in &self.definitions {
                match def.evaluate_start(action) {
                    None => {}
                    Some(Ok(SagaTransition::Continue { state, effects })) => {
                        let instance = SagaInstance::new(def.name(), state);
                        debug!(saga = def.name(), id = instance.id(), "saga started");
                        self.queue_save(def, &instance, &mut saves, &mut debounced);
                        batches.push((def.name().to_string(), effects));
                        table.insert(instance.id().to_string(), instance);
                    }
                    Some(Ok(SagaTransition::Complete { effects })) => {
                        // Transient saga: effects run, no instance is kept.
                        batches.push((def.name().to_string(), effects));
                    }
                    Some(Err(e)) => {
                        error!(saga = def.name(), error = %e, "saga start handler failed");
                        store.logger().error(
                            "saga {name} start handler failed: {error}",
                            &[&def.name(), &e],
                        );
                    }
                }
            }
        }

        if let Some(storage) = &self.storage {
            for id in &removals {
                self.clear_debounce(id);
                if let Err(e) = storage.remove(id).await {
                    (self.on_storage_error)(&e);
                }
            }
            for record in saves {
                if let Err(e) = storage.save(&record.id, &record).await {
                    (self.on_storage_error)(&e);
                }
            }
            for id in debounced {
                Self::schedule_debounced_save(&self, store, id);
            }
        }

        for (saga, effects) in batches {
            if effects.is_empty() {
                continue;
            }
            let store_bg = store.clone();
            store.spawn_scoped(async move {
                execute_effects(store_bg, saga, effects).await;
            });
        }
    }

    /// Queues a persistence write for a created or updated instance,
    /// according to the configured mode.
    fn queue_save(
        &self,
        def: &SagaDefinition,
        instance: &SagaInstance,
        saves: &mut Vec<PersistedSagaInstance>,
        debounced: &mut Vec<String>,
    ) {
        if self.storage.is_none() {
            return;
        }
        if self.mode.wants_immediate() {
            match encode_instance(def, instance) {
                Ok(record) => saves.push(record),
                Err(e) => {
                    error!(saga = def.name(), id = instance.id(), error = %e, "failed to encode saga instance");
                }
            }
        } else if self.mode.debounce_delay().is_some() {
            debounced.push(instance.id().to_string());
        }
    }

    /// Schedules a debounced save for an instance. The instance state is
    /// re-read at fire time, so the save always writes the latest state
    /// even when updates race with the delay.
    fn schedule_debounced_save<S: StateModel>(engine: &Arc<Self>, store: &Store<S>, id: String) {
        let Some(delay) = engine.mode.debounce_delay() else {
            return;
        };
        let generation = engine.bump_debounce(&id);
        let engine = Arc::clone(engine);
        store.spawn_scoped(async move {
            tokio::time::sleep(delay).await;
            if engine.debounce_generation(&id) != Some(generation) {
                return;
            }
            let record = {
                let table = engine.instances.lock().await;
                let Some(instance) = table.get(&id) else {
                    return;
                };
                let Some(def) = engine.definition(instance.name()) else {
                    return;
                };
                match encode_instance(def, instance) {
                    Ok(record) => record,
                    Err(e) => {
                        error!(id = %id, error = %e, "failed to encode saga instance");
                        return;
                    }
                }
            };
            if let Some(storage) = &engine.storage {
                if let Err(e) = storage.save(&record.id, &record).await {
                    (engine.on_storage_error)(&e);
                }
            }
        });
    }

    fn bump_debounce(&self, id: &str) -> u64 {
        let mut map = self.debounce.lock().expect("debounce lock poisoned");
        let generation = map.entry(id.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn debounce_generation(&self, id: &str) -> Option<u64> {
        self.debounce
            .lock()
            .expect("debounce lock poisoned")
            .get(id)
            .copied()
    }

    fn clear_debounce(&self, id: &str) {
        self.debounce
            .lock()
            .expect("debounce lock poisoned")
            .remove(id);
    }
}

impl std::fmt::Debug for SagaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaEngine")
            .field("definitions", &self.definitions.len())
            .field("persisted", &self.storage.is_some())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

fn encode_instance(
    def: &SagaDefinition,
    instance: &SagaInstance,
) -> Result<PersistedSagaInstance> {
    let codec = def
        .codec()
        .ok_or_else(|| SagaError::Handler(format!("saga {} has no state codec", def.name())))?;
    let state = (codec.encode)(&instance.state)?;
    Ok(PersistedSagaInstance {
        id: instance.id().to_string(),
        name: instance.name().to_string(),
        state,
        created_at: instance.created_at(),
        updated_at: instance.updated_at(),
    })
}

/// Executes one transition's effects strictly in list order.
async fn execute_effects<S: StateModel>(store: Store<S>, saga: String, effects: Vec<SagaEffect>) {
    for effect in effects {
        match effect {
            SagaEffect::Dispatch(action) | SagaEffect::StartSaga(action) => {
                if let Err(e) = store.dispatch(action.clone()).await {
                    warn!(saga = %saga, action = ?action, error = %e, "saga effect dispatch failed");
                }
            }
            SagaEffect::Delay(duration) => {
                tokio::time::sleep(duration).await;
            }
        }
    }
}

/// Middleware hooking the saga engine into the dispatch pipeline.
///
/// Every action is forwarded unchanged; saga processing runs in its own
/// store-scoped task so a slow saga never stalls the dispatch that
/// triggered it.
pub struct SagaMiddleware {
    engine: Arc<SagaEngine>,
}

impl SagaMiddleware {
    pub fn new(engine: Arc<SagaEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<SagaEngine> {
        &self.engine
    }
}

#[async_trait]
impl<S: StateModel> Middleware<S> for SagaMiddleware {
    async fn handle(
        &self,
        store: &Store<S>,
        action: AnyAction,
        next: Next<'_, S>,
    ) -> crate::middleware::Result<AnyAction> {
        let engine = Arc::clone(&self.engine);
        let store_bg = store.clone();
        let observed = action.clone();
        store.spawn_scoped(async move {
            engine.process(&store_bg, &observed).await;
        });
        next.run(action).await
    }
}

impl std::fmt::Debug for SagaMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaMiddleware")
            .field("engine", &self.engine)
            .finish()
    }
}
