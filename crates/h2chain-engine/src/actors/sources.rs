//! Bus wiring for the wind farm, the water pipe and the hydrogen demand.

use h2chain_core::sources::{HydrogenDemand, WaterPipe, WindFarm};
use h2chain_core::topics::Topics;
use h2chain_types::{ResourceKind, ResourceReply, TickMessage};
use rand::Rng;

use crate::handlers::{Actor, Envelope, collect_envelopes, decode};

/// Actor state for the wind farm.
#[derive(Debug)]
pub struct WindFarmActor<R> {
    farm: WindFarm<R>,
    topic: String,
}

impl<R: Rng> WindFarmActor<R> {
    /// Wrap `farm`, supplying power under `topics`.
    pub fn new(farm: WindFarm<R>, topics: &Topics) -> Self {
        Self {
            farm,
            topic: topics.supply(ResourceKind::Power),
        }
    }

    fn on_tick(&mut self, tick: &TickMessage) -> Vec<Envelope> {
        let supplies = self.farm.on_tick(tick);
        collect_envelopes(
            supplies
                .iter()
                .map(|supply| Envelope::json(self.topic.as_str(), supply)),
        )
    }
}

/// Build the wind farm actor.
pub fn wind_farm<R: Rng + Send + 'static>(
    state: WindFarmActor<R>,
    topics: &Topics,
) -> Actor<WindFarmActor<R>> {
    Actor::new("wind-farm", state).route(topics.tick(), |s: &mut WindFarmActor<R>, msg| {
        Ok(s.on_tick(&decode(msg)?))
    })
}

/// Actor state for the water pipe.
#[derive(Debug)]
pub struct WaterPipeActor {
    pipe: WaterPipe,
    topic: String,
}

impl WaterPipeActor {
    /// Wrap `pipe`, supplying water under `topics`.
    pub fn new(pipe: WaterPipe, topics: &Topics) -> Self {
        Self {
            pipe,
            topic: topics.supply(ResourceKind::Water),
        }
    }

    fn on_tick(&self, tick: &TickMessage) -> Vec<Envelope> {
        collect_envelopes([Envelope::json(self.topic.as_str(), &self.pipe.on_tick(tick))])
    }
}

/// Build the water pipe actor.
pub fn water_pipe(state: WaterPipeActor, topics: &Topics) -> Actor<WaterPipeActor> {
    Actor::new("water-pipe", state).route(topics.tick(), |s: &mut WaterPipeActor, msg| {
        Ok(s.on_tick(&decode(msg)?))
    })
}

/// Actor state for the hydrogen consumer.
#[derive(Debug)]
pub struct HydrogenDemandActor<R> {
    demand: HydrogenDemand<R>,
    topic: String,
}

impl<R: Rng> HydrogenDemandActor<R> {
    /// Wrap `demand`, requesting hydrogen under `topics`.
    pub fn new(demand: HydrogenDemand<R>, topics: &Topics) -> Self {
        Self {
            demand,
            topic: topics.request(ResourceKind::Hydrogen),
        }
    }

    /// The wrapped consumer.
    pub const fn demand(&self) -> &HydrogenDemand<R> {
        &self.demand
    }

    fn on_tick(&mut self, tick: &TickMessage) -> Vec<Envelope> {
        let request = self.demand.on_tick(tick);
        collect_envelopes([Envelope::json(self.topic.as_str(), &request)])
    }

    fn on_reply(&mut self, reply: &ResourceReply) -> Vec<Envelope> {
        self.demand.on_reply(reply);
        Vec::new()
    }
}

/// Build the hydrogen demand actor.
pub fn hydrogen_demand<R: Rng + Send + 'static>(
    state: HydrogenDemandActor<R>,
    topics: &Topics,
) -> Actor<HydrogenDemandActor<R>> {
    let reply = state.demand.reply_topic().to_owned();
    Actor::new("hydrogen-demand", state)
        .route(topics.tick(), |s: &mut HydrogenDemandActor<R>, msg| {
            Ok(s.on_tick(&decode(msg)?))
        })
        .route(reply, |s: &mut HydrogenDemandActor<R>, msg| {
            Ok(s.on_reply(&decode(msg)?))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use h2chain_core::config::{HydrogenDemandConfig, WaterPipeConfig};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn tick() -> TickMessage {
        TickMessage {
            sequence: 1,
            timestamp: "2018-01-01T00:00:00".to_owned(),
        }
    }

    #[test]
    fn pipe_supplies_on_water_subject() {
        let topics = Topics::default();
        let s = WaterPipeActor::new(WaterPipe::new(&WaterPipeConfig::default()), &topics);
        let out = s.on_tick(&tick());
        assert_eq!(out.len(), 1);
        assert!(out.iter().all(|e| e.topic == "h2.water.supply"));
    }

    #[test]
    fn demand_requests_on_hydrogen_subject() {
        let topics = Topics::default();
        let demand = HydrogenDemand::new(
            &HydrogenDemandConfig::default(),
            &topics,
            SmallRng::seed_from_u64(1),
        );
        let mut s = HydrogenDemandActor::new(demand, &topics);
        let out = s.on_tick(&tick());
        assert!(out.iter().all(|e| e.topic == "h2.hydrogen.request"));
        assert!(s.demand().daily_target() > 0.0);
    }
}
