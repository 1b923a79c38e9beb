//! Text rendering of tuner frames.

use std::io::{self, Write};

use tuner_core::tuning::Tuning;
use tuner_core::{ChordSource, TunerFrame, TuningStatus};

const METER_WIDTH: usize = 21;

/// One line per tuning: id, name and string targets.
pub fn tuning_line(tuning: &Tuning, a4_reference: f32) -> String {
    let strings: Vec<String> = tuning
        .strings
        .iter()
        .map(|s| format!("{} ({:.2} Hz)", s.label(), s.frequency(a4_reference)))
        .collect();
    format!("{:<18} {:<28} {}", tuning.id, tuning.name, strings.join("  "))
}

/// Needle for a cents value, `|` marks the target.
fn meter(cents: Option<f32>) -> String {
    let mut cells = vec!['-'; METER_WIDTH];
    let mid = METER_WIDTH / 2;
    cells[mid] = '|';
    if let Some(c) = cents {
        let offset = (c / 50.0 * mid as f32).round() as isize;
        let pos = (mid as isize + offset).clamp(0, METER_WIDTH as isize - 1) as usize;
        cells[pos] = '*';
    }
    cells.into_iter().collect()
}

fn chord_text(frame: &TunerFrame) -> String {
    match &frame.chord {
        Some(reading) => {
            let source = match reading.source {
                ChordSource::Simultaneous => "strum",
                ChordSource::Arpeggio => "arp",
            };
            format!("{} [{}] {}", reading.chord.name, reading.chord.notes.join(" "), source)
        }
        None => String::new(),
    }
}

/// Tuned marks per string, e.g. `G4 ok  C4 ..`.
pub fn tuned_summary(tuned: &[bool], tuning: &Tuning) -> String {
    tuning
        .strings
        .iter()
        .zip(tuned)
        .map(|(s, &done)| format!("{} {}", s.label(), if done { "ok" } else { ".." }))
        .collect::<Vec<_>>()
        .join("  ")
}

/// Single self-overwriting terminal line for live mode.
#[derive(Default)]
pub struct StatusLine {
    width: usize,
}

impl StatusLine {
    pub fn render(&mut self, frame: &TunerFrame, tuning: &Tuning) -> io::Result<()> {
        let target = frame
            .string_match
            .as_ref()
            .map_or_else(String::new, |m| format!("-> {}", m.string_name));
        let cents = frame
            .display_cents
            .map_or_else(|| "     ".to_string(), |c| format!("{c:+5.1}"));
        let mut text = format!(
            "{:<4} {} {} {:<8} {:<7} {}  {}",
            frame.note_label(),
            meter(frame.display_cents),
            cents,
            frame.status.as_str(),
            target,
            tuned_summary(&frame.tuned_strings, tuning),
            chord_text(frame),
        );
        if let Some(announcement) = &frame.announcement {
            text.push_str(&format!("  \"{}\"", announcement.text()));
        }
        let pad = self.width.saturating_sub(text.len());
        self.width = text.len();

        let mut out = io::stdout().lock();
        write!(out, "\r{text}{}", " ".repeat(pad))?;
        out.flush()
    }

    pub fn finish(&mut self) -> io::Result<()> {
        if self.width > 0 {
            writeln!(io::stdout())?;
        }
        Ok(())
    }
}

/// Prints a line whenever the note, status or chord changes.
#[derive(Default)]
pub struct EventLog {
    last: Option<(String, TuningStatus, Option<String>)>,
}

impl EventLog {
    pub fn record(&mut self, frame: &TunerFrame) {
        let chord = frame.chord.as_ref().map(|c| c.chord.name.clone());
        let key = (frame.note_label(), frame.status, chord);
        if self.last.as_ref() == Some(&key) {
            return;
        }
        let seconds = frame.timestamp_ms as f32 / 1000.0;
        let cents = frame.cents.map_or_else(String::new, |c| format!("{c:+.1}c"));
        println!(
            "{seconds:7.2}s  {:<4} {:<8} {:<7} {}",
            frame.note_label(),
            frame.status.as_str(),
            cents,
            chord_text(frame)
        );
        self.last = Some(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuner_core::tuning::preset;

    #[test]
    fn meter_marks_deviation() {
        assert_eq!(meter(None), "----------|----------");
        assert_eq!(meter(Some(0.0)), "----------*----------");
        assert_eq!(meter(Some(-50.0)), "*---------|----------");
        assert_eq!(meter(Some(80.0)), "----------|---------*");
    }

    #[test]
    fn tuned_summary_lists_every_string() {
        let tuning = preset("ukulele-standard").unwrap();
        assert_eq!(
            tuned_summary(&[true, false, false, true], &tuning),
            "G4 ok  C4 ..  E4 ..  A4 ok"
        );
    }
}
