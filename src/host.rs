use glam::Mat4;

use crate::error::Result;
use crate::simulator::Simulator;
use crate::state::SimulationArea;

/// Consumer of one completed frame's transforms, typically an instanced draw.
pub trait InstanceSink {
    fn submit(&mut self, transforms: &[Mat4]);
}

impl<F: FnMut(&[Mat4])> InstanceSink for F {
    fn submit(&mut self, transforms: &[Mat4]) {
        self(transforms)
    }
}

/// Drives a [`Simulator`] with the pipelined tick order: join the previous
/// frame, hand its transforms to the sink, then schedule the next frame.
pub struct HostLoop {
    simulator: Simulator,
    area: SimulationArea,
}

impl HostLoop {
    pub fn new(simulator: Simulator, area: SimulationArea) -> Self {
        Self { simulator, area }
    }

    /// Takes effect from the next scheduled frame.
    pub fn set_area(&mut self, area: SimulationArea) {
        self.area = area;
    }

    pub fn area(&self) -> SimulationArea {
        self.area
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn tick<S: InstanceSink + ?Sized>(&mut self, sink: &mut S, dt: f32) -> Result<()> {
        let transforms = self.simulator.complete()?;
        sink.submit(transforms);
        self.simulator.execute(self.area, dt)
    }

    /// Drains the in-flight frame and releases the simulator.
    pub fn shutdown(self) -> Result<()> {
        self.simulator.dispose()
    }
}

#[cfg(test)]
mod tests {
    use super::{HostLoop, InstanceSink};
    use crate::config::FlockConfig;
    use crate::simulator::Simulator;
    use crate::state::SimulationArea;
    use glam::Mat4;

    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<Vec<Mat4>>,
    }

    impl InstanceSink for RecordingSink {
        fn submit(&mut self, transforms: &[Mat4]) {
            self.frames.push(transforms.to_vec());
        }
    }

    fn host(count: usize) -> HostLoop {
        let config = FlockConfig {
            seed: Some(99),
            ..FlockConfig::default()
        };
        let area = SimulationArea::default();
        let simulator = Simulator::new(&config, count, area).expect("valid");
        HostLoop::new(simulator, area)
    }

    #[test]
    fn each_tick_submits_previous_frame() {
        let mut host = host(32);
        let mut sink = RecordingSink::default();

        for _ in 0..4 {
            host.tick(&mut sink, 1.0 / 60.0).expect("tick");
        }

        assert_eq!(sink.frames.len(), 4);
        assert!(sink.frames.iter().all(|frame| frame.len() == 32));
        assert_ne!(sink.frames[0], sink.frames[3]);
        assert!(host.simulator().is_computing());
        assert!(host.shutdown().is_ok());
    }

    #[test]
    fn closures_act_as_sinks() {
        let mut host = host(8);
        let mut submitted = 0;
        let mut sink = |transforms: &[Mat4]| submitted += transforms.len();

        host.tick(&mut sink, 0.02).expect("tick");
        host.tick(&mut sink, 0.02).expect("tick");
        host.shutdown().expect("shutdown");

        assert_eq!(submitted, 16);
    }
}
