//! Tokenized judge protocol: the init block, per-tick frames, and the
//! command batch that answers each of them.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use quayside_core::{Command, Point};
use quayside_world::{FrameInput, RobotReport, ShipReport};

/// Whitespace-separated token reader over the judge's stdin.
///
/// All reads are token-based so line layout never matters; `None` anywhere
/// means the judge closed the stream and the match is over.
pub(crate) struct TokenReader<R> {
    reader: R,
    tokens: VecDeque<String>,
}

impl<R: BufRead> TokenReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            tokens: VecDeque::new(),
        }
    }

    fn next_token(&mut self) -> Result<Option<String>> {
        while self.tokens.is_empty() {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .context("reading from the judge")?;
            if read == 0 {
                return Ok(None);
            }
            self.tokens
                .extend(line.split_whitespace().map(str::to_owned));
        }
        Ok(self.tokens.pop_front())
    }

    fn next<T: FromStr>(&mut self) -> Result<Option<T>> {
        let Some(token) = self.next_token()? else {
            return Ok(None);
        };
        match token.parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => bail!("unparseable judge token {token:?}"),
        }
    }

    fn expect_ok(&mut self) -> Result<Option<()>> {
        let Some(token) = self.next_token()? else {
            return Ok(None);
        };
        if token != "OK" {
            bail!("expected OK from the judge, got {token:?}");
        }
        Ok(Some(()))
    }
}

/// Everything the judge sends during the init phase.
#[derive(Debug)]
pub(crate) struct Setup {
    pub(crate) map_lines: Vec<String>,
    /// `(id, anchor, docking_delay, loading_velocity)` per berth.
    pub(crate) berths: Vec<(u32, Point, u32, u32)>,
    pub(crate) ship_capacity: u32,
}

/// Reads the init block: `rows` map lines, `berth_count` berth
/// descriptions, the shared ship capacity, and the closing `OK`.
pub(crate) fn read_setup<R: BufRead>(
    reader: &mut TokenReader<R>,
    rows: usize,
    berth_count: usize,
) -> Result<Option<Setup>> {
    let mut map_lines = Vec::with_capacity(rows);
    for _ in 0..rows {
        let Some(line) = reader.next_token()? else {
            return Ok(None);
        };
        map_lines.push(line);
    }

    let mut berths = Vec::with_capacity(berth_count);
    for _ in 0..berth_count {
        let Some(id) = reader.next::<u32>()? else {
            return Ok(None);
        };
        let Some(row) = reader.next::<i32>()? else {
            return Ok(None);
        };
        let Some(col) = reader.next::<i32>()? else {
            return Ok(None);
        };
        let Some(docking_delay) = reader.next::<u32>()? else {
            return Ok(None);
        };
        let Some(loading_velocity) = reader.next::<u32>()? else {
            return Ok(None);
        };
        berths.push((id, Point::new(row, col), docking_delay, loading_velocity));
    }

    let Some(ship_capacity) = reader.next::<u32>()? else {
        return Ok(None);
    };
    if reader.expect_ok()?.is_none() {
        return Ok(None);
    }

    Ok(Some(Setup {
        map_lines,
        berths,
        ship_capacity,
    }))
}

/// Reads one tick: frame header, new goods, robot and ship reports, and
/// the closing `OK`.
pub(crate) fn read_frame<R: BufRead>(
    reader: &mut TokenReader<R>,
    robot_count: usize,
    ship_count: usize,
) -> Result<Option<FrameInput>> {
    let Some(frame) = reader.next::<u32>()? else {
        return Ok(None);
    };
    let Some(funds) = reader.next::<u32>()? else {
        return Ok(None);
    };

    let Some(new_count) = reader.next::<usize>()? else {
        return Ok(None);
    };
    let mut new_goods = Vec::with_capacity(new_count);
    for _ in 0..new_count {
        let Some(row) = reader.next::<i32>()? else {
            return Ok(None);
        };
        let Some(col) = reader.next::<i32>()? else {
            return Ok(None);
        };
        let Some(value) = reader.next::<u32>()? else {
            return Ok(None);
        };
        new_goods.push((Point::new(row, col), value));
    }

    let mut robots = Vec::with_capacity(robot_count);
    for _ in 0..robot_count {
        let Some(carrying) = reader.next::<u8>()? else {
            return Ok(None);
        };
        let Some(row) = reader.next::<i32>()? else {
            return Ok(None);
        };
        let Some(col) = reader.next::<i32>()? else {
            return Ok(None);
        };
        let Some(motion_state) = reader.next::<u8>()? else {
            return Ok(None);
        };
        robots.push(RobotReport {
            carrying: carrying != 0,
            pos: Point::new(row, col),
            motion_state,
        });
    }

    let mut ships = Vec::with_capacity(ship_count);
    for _ in 0..ship_count {
        let Some(state) = reader.next::<u8>()? else {
            return Ok(None);
        };
        let Some(berth) = reader.next::<i32>()? else {
            return Ok(None);
        };
        ships.push(ShipReport { state, berth });
    }

    if reader.expect_ok()?.is_none() {
        return Ok(None);
    }

    Ok(Some(FrameInput {
        frame,
        funds,
        new_goods,
        robots,
        ships,
    }))
}

/// Writes one frame's command batch, terminated by `OK`, and flushes so
/// the judge never stalls on buffering.
pub(crate) fn write_commands<W: Write>(writer: &mut W, commands: &[Command]) -> Result<()> {
    for command in commands {
        writeln!(writer, "{command}").context("writing a command")?;
    }
    writeln!(writer, "OK").context("writing the frame terminator")?;
    writer.flush().context("flushing the command batch")?;
    Ok(())
}
