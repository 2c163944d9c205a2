//! Streaming downsampler.
//!
//! Readings are pushed in time order. Up to `max_points` of them are passed through
//! untouched; as soon as one more arrives the request window is split into `max_points`
//! equal-width buckets and every reading so far is replayed into them. Only one bucket
//! is open at any time, so memory stays bounded by the output size plus the readings of
//! the open bucket.
//!
//! Each non-empty bucket contributes exactly one representative:
//!
//! 1. if any reading in it exceeds, the exceeding reading furthest from the bucket mean;
//! 2. otherwise the reading closest to the median timestamp of the bucket's readings.
//!
//! Ties go to the earliest reading.

use time::{Duration, OffsetDateTime};

use fieldline_types::Reading;

use crate::error::{Error, Result};

/// Incremental reducer over one request window `[start, end)`.
#[derive(Debug)]
pub struct Downsampler {
    start: OffsetDateTime,
    end: OffsetDateTime,
    max_points: usize,
    span: i128,
    last: Option<OffsetDateTime>,
    raw_count: usize,
    mode: Mode,
}

#[derive(Debug)]
enum Mode {
    PassThrough(Vec<Reading>),
    Bucketed {
        emitted: Vec<Reading>,
        open: Option<Bucket>,
    },
}

#[derive(Debug)]
struct Bucket {
    index: usize,
    sum: f64,
    readings: Vec<Reading>,
}

impl Bucket {
    fn new(index: usize) -> Self {
        Self {
            index,
            sum: 0.0,
            readings: Vec::new(),
        }
    }

    fn add(&mut self, reading: Reading) {
        self.sum += reading.reading_value;
        self.readings.push(reading);
    }

    /// The reading nearest the time-median.
    ///
    /// Readings arrive sorted, so for an odd count the median is the middle reading and
    /// for an even count the two middle readings are equally near; the earlier wins
    /// either way. Readings sharing its timestamp resolve to the first of them.
    fn median(&self) -> Option<Reading> {
        let middle = self.readings.get(self.readings.len().checked_sub(1)? / 2)?;
        self.readings
            .iter()
            .find(|r| r.reading_date == middle.reading_date)
            .copied()
    }

    fn representative(self) -> Option<Reading> {
        let mean = self.sum / self.readings.len() as f64;
        let mut best: Option<(f64, Reading)> = None;
        for reading in self.readings.iter().filter(|r| r.exceeds_limit_values) {
            let deviation = (reading.reading_value - mean).abs();
            match &best {
                Some((d, _)) if *d >= deviation => {}
                _ => best = Some((deviation, *reading)),
            }
        }
        best.map(|(_, reading)| reading).or_else(|| self.median())
    }
}

impl Downsampler {
    /// Create a reducer for the window `[start, end)`.
    ///
    /// Fails with [`Error::InvalidRange`] when the window is empty or `max_points` is zero.
    pub fn new(start: OffsetDateTime, end: OffsetDateTime, max_points: usize) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidRange(format!(
                "start {start} is not before end {end}"
            )));
        }
        if max_points == 0 {
            return Err(Error::InvalidRange("max points must be positive".to_string()));
        }
        Ok(Self {
            start,
            end,
            max_points,
            span: (end - start).whole_nanoseconds(),
            last: None,
            raw_count: 0,
            mode: Mode::PassThrough(Vec::new()),
        })
    }

    /// Number of in-window readings pushed so far.
    #[must_use]
    pub fn raw_count(&self) -> usize {
        self.raw_count
    }

    /// Whether the input has outgrown the point budget.
    #[must_use]
    pub fn is_reducing(&self) -> bool {
        matches!(self.mode, Mode::Bucketed { .. })
    }

    /// Feed the next reading.
    ///
    /// Readings outside the window are ignored. A reading earlier than its predecessor
    /// fails with [`Error::UnorderedReadings`].
    pub fn push(&mut self, reading: Reading) -> Result<()> {
        let ts = reading.reading_date;
        if let Some(previous) = self.last
            && ts < previous
        {
            return Err(Error::UnorderedReadings {
                previous,
                current: ts,
            });
        }
        self.last = Some(ts);
        if ts < self.start || ts >= self.end {
            return Ok(());
        }
        self.raw_count += 1;

        if let Mode::PassThrough(buffer) = &mut self.mode {
            if buffer.len() < self.max_points {
                buffer.push(reading);
                return Ok(());
            }
            let replay = std::mem::take(buffer);
            self.mode = Mode::Bucketed {
                emitted: Vec::with_capacity(self.max_points),
                open: None,
            };
            for earlier in replay {
                self.add_to_bucket(earlier);
            }
        }
        self.add_to_bucket(reading);
        Ok(())
    }

    /// Close the stream and return the reduced readings in time order.
    #[must_use]
    pub fn finish(self) -> Vec<Reading> {
        match self.mode {
            Mode::PassThrough(buffer) => buffer,
            Mode::Bucketed { mut emitted, open } => {
                if let Some(rep) = open.and_then(Bucket::representative) {
                    emitted.push(rep);
                }
                emitted
            }
        }
    }

    fn offset_of(&self, ts: OffsetDateTime) -> i128 {
        (ts - self.start).whole_nanoseconds()
    }

    fn bucket_index(&self, offset: i128) -> usize {
        let index = offset * self.max_points as i128 / self.span;
        usize::try_from(index)
            .unwrap_or(0)
            .min(self.max_points - 1)
    }

    fn add_to_bucket(&mut self, reading: Reading) {
        let index = self.bucket_index(self.offset_of(reading.reading_date));
        let Mode::Bucketed { emitted, open } = &mut self.mode else {
            return;
        };
        if open.as_ref().is_some_and(|b| b.index != index)
            && let Some(rep) = open.take().and_then(Bucket::representative)
        {
            emitted.push(rep);
        }
        open.get_or_insert_with(|| Bucket::new(index)).add(reading);
    }
}

/// Downsample an ordered slice, taking the window from the data itself.
///
/// The window runs from the first reading to just after the last one.
pub fn downsample(readings: &[Reading], max_points: usize) -> Result<Vec<Reading>> {
    let (Some(first), Some(last)) = (readings.first(), readings.last()) else {
        if max_points == 0 {
            return Err(Error::InvalidRange("max points must be positive".to_string()));
        }
        return Ok(Vec::new());
    };
    let end = last.reading_date + Duration::nanoseconds(1);
    let mut sampler = Downsampler::new(first.reading_date, end, max_points)?;
    for reading in readings {
        sampler.push(*reading)?;
    }
    Ok(sampler.finish())
}
