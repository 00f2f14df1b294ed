use std::sync::Arc;

use async_trait::async_trait;
use common::{Command, Event, Message};
use criterion::{Criterion, criterion_group, criterion_main};
use message_bus::{
    CommandHandler, Dependency, EventHandler, HandlerContext, HandlerError, MessageBus,
};
use serde::{Deserialize, Serialize};
use unit_of_work::{
    Aggregate, Entity, InMemoryStore, NoLookup, PendingMessages, UnitOfWorkFactory,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tick {
    n: u32,
}

impl Entity for Tick {
    type Id = u32;

    fn id(&self) -> &u32 {
        &self.n
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Counter {
    id: String,
    ticks: Vec<Tick>,
    #[serde(skip)]
    messages: PendingMessages,
}

impl Entity for Counter {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }
}

impl Aggregate for Counter {
    type Item = Tick;
    type Lookup = NoLookup;

    fn aggregate_type() -> &'static str {
        "counters"
    }

    fn items(&self) -> &[Tick] {
        &self.ticks
    }

    fn messages(&self) -> &PendingMessages {
        &self.messages
    }

    fn messages_mut(&mut self) -> &mut PendingMessages {
        &mut self.messages
    }
}

#[derive(Debug)]
struct Bump {
    id: String,
}

impl Command for Bump {
    const NAME: &'static str = "Bump";
    type Output = usize;
}

#[derive(Debug)]
struct Bumped;

impl Event for Bumped {
    const NAME: &'static str = "Bumped";
}

struct BumpCounter;

#[async_trait]
impl CommandHandler<Bump> for BumpCounter {
    fn dependencies(&self) -> &'static [Dependency] {
        &[Dependency::UnitOfWork]
    }

    async fn handle(&self, cmd: Bump, ctx: &mut HandlerContext<'_>) -> Result<usize, HandlerError> {
        let mut uow = ctx.uow()?.enter().await?;
        let repo = uow.repository::<Counter>()?;
        let counter = match repo.get(&cmd.id).await? {
            Some(counter) => counter,
            None => uow.repository::<Counter>()?.add(Counter {
                id: cmd.id.clone(),
                ticks: Vec::new(),
                messages: PendingMessages::new(),
            }),
        };
        let n = counter.ticks.len() as u32 + 1;
        counter.ticks.push(Tick { n });
        counter.raise(Bumped);
        let count = counter.ticks.len();
        uow.commit().await?;
        Ok(count)
    }
}

struct Ignore;

#[async_trait]
impl EventHandler<Bumped> for Ignore {
    async fn handle(&self, _: &Bumped, _: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
        Ok(())
    }
}

fn make_bus(store: &InMemoryStore) -> MessageBus {
    let mut bus = MessageBus::new();
    bus.bind_uow(
        UnitOfWorkFactory::new(Arc::new(store.clone())).with_repository::<Counter>(),
    );
    bus.on_command::<Bump, _>(BumpCounter).unwrap();
    bus.on_event::<Bumped, _>(Ignore);
    bus
}

fn bench_single_command(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let bus = make_bus(&store);

    c.bench_function("bus/command_with_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                bus.handle(Message::command(Bump {
                    id: "bench".to_string(),
                }))
                .await
                .unwrap();
            });
        });
    });
}

fn bench_fresh_aggregates(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("bus/ten_fresh_aggregates", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryStore::new();
                let bus = make_bus(&store);
                for i in 0..10 {
                    bus.handle(Message::command(Bump {
                        id: format!("counter-{i}"),
                    }))
                    .await
                    .unwrap();
                }
            });
        });
    });
}

criterion_group!(benches, bench_single_command, bench_fresh_aggregates);
criterion_main!(benches);
