//! Bus wiring for one [`PlantAgent`].

use h2chain_core::plant::{Outbound, PlantAgent};
use h2chain_core::topics::Topics;
use h2chain_types::{PlannedOutput, ResourceReply, TickMessage};
use rand::Rng;

use crate::handlers::{Actor, Envelope, collect_envelopes, decode};

/// Actor state wrapping one plant.
#[derive(Debug)]
pub struct PlantActor<R> {
    plant: PlantAgent<R>,
    topics: Topics,
}

impl<R: Rng> PlantActor<R> {
    /// Wrap `plant`, publishing under `topics`.
    pub const fn new(plant: PlantAgent<R>, topics: Topics) -> Self {
        Self { plant, topics }
    }

    /// The wrapped plant.
    pub const fn plant(&self) -> &PlantAgent<R> {
        &self.plant
    }

    fn on_tick(&mut self, tick: &TickMessage) -> Vec<Envelope> {
        let out = self.plant.on_tick(tick);
        self.encode(out)
    }

    fn on_plan(&mut self, plan: &PlannedOutput) -> Vec<Envelope> {
        self.plant.on_plan(plan);
        Vec::new()
    }

    fn on_power(&mut self, reply: &ResourceReply) -> Vec<Envelope> {
        let out = self.plant.on_power(reply);
        self.encode(out)
    }

    fn on_input(&mut self, reply: &ResourceReply) -> Vec<Envelope> {
        let out = self.plant.on_input(reply);
        self.encode(out)
    }

    fn encode(&self, out: Vec<Outbound>) -> Vec<Envelope> {
        collect_envelopes(out.into_iter().map(|message| match message {
            Outbound::Request { resource, request } => {
                Envelope::json(self.topics.request(resource), &request)
            }
            Outbound::Supply { resource, supply } => {
                Envelope::json(self.topics.supply(resource), &supply)
            }
            Outbound::Kpi(report) => Envelope::json(self.topics.kpi(&report.plant_id), &report),
        }))
    }
}

/// Build the actor and its handler table.
pub fn actor<R: Rng + Send + 'static>(state: PlantActor<R>) -> Actor<PlantActor<R>> {
    let topics = state.topics.clone();
    let plan = topics.plan(state.plant.kind().output());
    let power = state.plant.power_reply_topic().to_owned();
    let input = state.plant.input_reply_topic().to_owned();
    Actor::new(format!("plant:{}", state.plant.id()), state)
        .route(topics.tick(), |s: &mut PlantActor<R>, msg| {
            Ok(s.on_tick(&decode(msg)?))
        })
        .route(plan, |s: &mut PlantActor<R>, msg| Ok(s.on_plan(&decode(msg)?)))
        .route(power, |s: &mut PlantActor<R>, msg| {
            Ok(s.on_power(&decode(msg)?))
        })
        .route(input, |s: &mut PlantActor<R>, msg| {
            Ok(s.on_input(&decode(msg)?))
        })
}
