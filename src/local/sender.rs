use rand::Rng;
use std::fs::File;
use std::net::UdpSocket;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::processing::decoder::encode_position;
use crate::processing::queue::PositionSample;

const SLEEP_TIME: u64 = 10;

// -----------------------------------------------------------------------------
// SETUP FOR IMPORTING POSITIONS FROM CSV
// -----------------------------------------------------------------------------

/// Read rows of `x,y,width,height`. A header row is expected.
pub fn read_positions_from_csv<P: AsRef<Path>>(file_path: P) -> Result<Vec<PositionSample>> {
    let mut rdr = csv::Reader::from_reader(File::open(file_path)?);
    let mut positions = Vec::new();

    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let values: Vec<f32> = record
            .iter()
            .map(|value| value.trim().parse::<f32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::InvalidParameter(format!("row {}: {}", row + 1, e)))?;
        if values.len() != 4 {
            return Err(Error::InvalidParameter(format!(
                "row {}: expected 4 columns, got {}",
                row + 1,
                values.len()
            )));
        }
        positions.push(PositionSample::new(values[0], values[1], values[2], values[3]));
    }

    Ok(positions)
}

// -----------------------------------------------------------------------------
// SETUP FOR THE SIMULATED POSITIONS
// -----------------------------------------------------------------------------

const ARENA_SIZE: f32 = 1.0;
const STEP_SIZE: f32 = 0.01;
const MARKER_WIDTH: f32 = 0.05;
const MARKER_HEIGHT: f32 = 0.05;

/// Bounded random walk inside a unit arena.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    x: f32,
    y: f32,
}

impl RandomWalk {
    pub fn new() -> Self {
        Self {
            x: ARENA_SIZE / 2.0,
            y: ARENA_SIZE / 2.0,
        }
    }

    pub fn step<R: Rng>(&mut self, rng: &mut R) -> PositionSample {
        self.x = (self.x + rng.gen_range(-STEP_SIZE..=STEP_SIZE)).clamp(0.0, ARENA_SIZE);
        self.y = (self.y + rng.gen_range(-STEP_SIZE..=STEP_SIZE)).clamp(0.0, ARENA_SIZE);
        PositionSample::new(self.x, self.y, MARKER_WIDTH, MARKER_HEIGHT)
    }
}

impl Default for RandomWalk {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// RUN CODE
// -----------------------------------------------------------------------------

/// Stream positions to `127.0.0.1:<port>`, from a CSV file when given and
/// from a random walk otherwise.
pub fn run(port: u16, address: &str, csv_path: Option<&str>) -> Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0")?;
    let target = ("127.0.0.1", port);
    log::info!("Sending {} positions to port {}", address, port);

    match csv_path {
        Some(path) => {
            let positions = read_positions_from_csv(path)?;
            log::info!("Loaded {} positions from {}", positions.len(), path);
            for position in &positions {
                send_position(&socket, target, address, position)?;
                thread::sleep(Duration::from_millis(SLEEP_TIME));
            }
            Ok(())
        }
        None => {
            let mut rng = rand::thread_rng();
            let mut walk = RandomWalk::new();
            loop {
                send_position(&socket, target, address, &walk.step(&mut rng))?;
                thread::sleep(Duration::from_millis(SLEEP_TIME));
            }
        }
    }
}

fn send_position(
    socket: &UdpSocket,
    target: (&str, u16),
    address: &str,
    position: &PositionSample,
) -> Result<()> {
    let packet = encode_position(
        address,
        position.x,
        position.y,
        position.width,
        position.height,
    )?;
    socket.send_to(&packet, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_positions() {
        let path = std::env::temp_dir().join(format!(
            "tracking-node-positions-{}.csv",
            std::process::id()
        ));
        std::fs::write(&path, "x,y,width,height\n1,2,3,4\n0.5, 0.25, 0.1, 0.2\n").unwrap();
        let positions = read_positions_from_csv(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0], PositionSample::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(positions[1].y, 0.25);
    }

    #[test]
    fn test_random_walk_stays_in_arena() {
        let mut rng = rand::thread_rng();
        let mut walk = RandomWalk::new();
        for _ in 0..10_000 {
            let p = walk.step(&mut rng);
            assert!((0.0..=ARENA_SIZE).contains(&p.x));
            assert!((0.0..=ARENA_SIZE).contains(&p.y));
        }
    }
}
