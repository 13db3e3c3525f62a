//! Look-ahead transport
//!
//! Tracks where the next beat falls on the audio clock. The scheduling pass
//! repeatedly asks for beats due before `now + lookahead`; each answer moves
//! the transport forward by exactly one beat of musical time, so the beat
//! sequence is strictly increasing and never accumulates drift from the
//! caller's scheduling jitter.
//!
//! Tempo changes while running are a linear ramp on the tempo curve. Beat
//! positions are the integral of the curve, so a ramp bends the intervals
//! gradually instead of snapping them.

/// Tempo as a function of audio-clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoCurve {
    pub from_bpm: f64,
    pub to_bpm: f64,
    /// Audio-clock time the ramp starts at
    pub ramp_start: f64,
    /// Ramp duration in seconds; 0 means constant tempo
    pub ramp_secs: f64,
}

impl TempoCurve {
    pub fn constant(bpm: f64) -> Self {
        Self {
            from_bpm: bpm,
            to_bpm: bpm,
            ramp_start: 0.0,
            ramp_secs: 0.0,
        }
    }

    pub fn bpm_at(&self, time: f64) -> f64 {
        if self.ramp_secs <= 0.0 || time >= self.ramp_start + self.ramp_secs {
            return self.to_bpm;
        }
        if time <= self.ramp_start {
            return self.from_bpm;
        }
        let progress = (time - self.ramp_start) / self.ramp_secs;
        self.from_bpm + (self.to_bpm - self.from_bpm) * progress
    }

    pub fn is_ramping(&self, time: f64) -> bool {
        self.ramp_secs > 0.0 && time < self.ramp_start + self.ramp_secs
    }

    /// Time at which one full beat has elapsed after `time`.
    pub fn beat_after(&self, time: f64) -> f64 {
        let mut remaining = 1.0;
        let mut now = time;

        if self.is_ramping(now) {
            if now < self.ramp_start {
                let beats = (self.ramp_start - now) * self.from_bpm / 60.0;
                if beats >= remaining {
                    return now + remaining * 60.0 / self.from_bpm;
                }
                remaining -= beats;
                now = self.ramp_start;
            }

            let ramp_end = self.ramp_start + self.ramp_secs;
            let start_bpm = self.bpm_at(now);
            let slope = (self.to_bpm - self.from_bpm) / self.ramp_secs;
            let span = ramp_end - now;
            let beats = (start_bpm * span + 0.5 * slope * span * span) / 60.0;
            if beats >= remaining {
                // Solve 0.5*slope*x^2 + start_bpm*x = 60*remaining for x > 0
                let target = 60.0 * remaining;
                let disc = (start_bpm * start_bpm + 2.0 * slope * target).max(0.0);
                return now + 2.0 * target / (start_bpm + disc.sqrt());
            }
            remaining -= beats;
            now = ramp_end;
        }

        now + remaining * 60.0 / self.to_bpm
    }
}

/// A beat handed to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatTick {
    /// Zero-based index since the transport started
    pub index: u64,
    /// Audio-clock time in seconds
    pub time: f64,
    /// Tempo in effect at `time`
    pub bpm: f64,
}

#[derive(Debug, Clone)]
pub struct Transport {
    curve: TempoCurve,
    /// Time of the last beat handed out; the next beat is derived from it
    last_time: Option<f64>,
    next_time: f64,
    next_index: u64,
}

impl Transport {
    /// Create a transport whose first beat falls at `first_beat_at`.
    pub fn new(bpm: f64, first_beat_at: f64) -> Self {
        Self {
            curve: TempoCurve::constant(bpm),
            last_time: None,
            next_time: first_beat_at,
            next_index: 0,
        }
    }

    pub fn curve(&self) -> &TempoCurve {
        &self.curve
    }

    pub fn bpm_at(&self, time: f64) -> f64 {
        self.curve.bpm_at(time)
    }

    /// Tempo the transport is heading to (the current tempo when not ramping).
    pub fn target_bpm(&self) -> f64 {
        self.curve.to_bpm
    }

    pub fn next_beat_time(&self) -> f64 {
        self.next_time
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Ramp linearly from the tempo in effect at `now` to `bpm` over
    /// `ramp_secs`. Returns the tempo the ramp starts from.
    ///
    /// The next beat has not been handed out yet, so it is re-derived from
    /// the last beat under the new curve.
    pub fn ramp_to(&mut self, bpm: f64, now: f64, ramp_secs: f64) -> f64 {
        let from_bpm = self.curve.bpm_at(now);
        self.curve = TempoCurve {
            from_bpm,
            to_bpm: bpm,
            ramp_start: now,
            ramp_secs: ramp_secs.max(0.0),
        };
        if let Some(last_time) = self.last_time {
            self.next_time = self.curve.beat_after(last_time);
        }
        from_bpm
    }

    /// Pop the next beat if it falls before `horizon`.
    pub fn next_due(&mut self, horizon: f64) -> Option<BeatTick> {
        if self.next_time >= horizon {
            return None;
        }
        let tick = self.advance();
        Some(tick)
    }

    /// Drop beats that fall before `cutoff`. Returns how many were skipped.
    pub fn skip_stale(&mut self, cutoff: f64) -> u64 {
        let mut skipped = 0;
        while self.next_time < cutoff {
            self.advance();
            skipped += 1;
        }
        skipped
    }

    fn advance(&mut self) -> BeatTick {
        let bpm = self.curve.bpm_at(self.next_time);
        let tick = BeatTick {
            index: self.next_index,
            time: self.next_time,
            bpm,
        };
        self.last_time = Some(self.next_time);
        self.next_time = self.curve.beat_after(self.next_time);
        self.next_index += 1;
        tick
    }
}
