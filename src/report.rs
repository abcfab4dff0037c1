//! Hierarchy-aware rendering of the statistics forest
//!
//! Produces a single markup document, fully regenerated on every write: a
//! timestamp header, then one nested block per root scope. Blocks carry a
//! frequency-relative-to-parent line, a timing block, the share of the parent
//! total the scope consumed, and a color derived from that share. Blocks of
//! currently active builds open by default when hot enough; everything else
//! stays collapsed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use fnv::FnvHashSet;

use crate::build_id::BuildFingerprint;
use crate::results::{NodeId, ResultForest, ResultNode};

/// A block is pre-expanded once its share of the parent's total crosses this.
const EXPAND_HOTNESS_THRESHOLD: f64 = 0.20;

/// Color gradient endpoints, cold to hot.
const COLD: [u8; 3] = [0x4a, 0x90, 0xd9];
const NEUTRAL: [u8; 3] = [0x99, 0x99, 0x99];
const HOT: [u8; 3] = [0xcc, 0x00, 0x00];

/// Overwrite `path` with a report of the full forest.
pub fn write_report(
    forest: &ResultForest,
    active: &FnvHashSet<BuildFingerprint>,
    path: &Path,
) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("creating report file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    render(&mut out, forest, active)
        .with_context(|| format!("writing report to {}", path.display()))?;
    out.flush().context("flushing report")?;
    Ok(())
}

/// Render the report into any writer.
pub fn render<W: Write>(
    out: &mut W,
    forest: &ResultForest,
    active: &FnvHashSet<BuildFingerprint>,
) -> std::io::Result<()> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    writeln!(out, "# Profiling report")?;
    writeln!(out)?;
    writeln!(
        out,
        "_generated at unix time {}.{:03}_",
        stamp.as_secs(),
        stamp.subsec_millis()
    )?;
    writeln!(out)?;

    for id in forest.roots_sorted() {
        render_node(out, forest, active, id, None, 0)?;
        writeln!(out)?;
    }
    Ok(())
}

fn render_node<W: Write>(
    out: &mut W,
    forest: &ResultForest,
    active: &FnvHashSet<BuildFingerprint>,
    id: NodeId,
    parent: Option<&ResultNode>,
    depth: usize,
) -> std::io::Result<()> {
    let node = forest.node(id);
    let indent = "  ".repeat(depth);

    let hotness = relative_hotness(node, parent);
    let color = hotness_color(hotness);
    let expanded = active.contains(&node.build) && hotness > EXPAND_HOTNESS_THRESHOLD;

    writeln!(
        out,
        "{indent}<details{}>",
        if expanded { " open" } else { "" }
    )?;
    writeln!(
        out,
        "{indent}<summary><span style=\"color: {color}\"><code>{}</code></span> \
         <code>[{}]</code></summary>",
        escape_html(&node.name),
        node.build.tag()
    )?;
    writeln!(out)?;

    render_frequency(out, &indent, node, parent.map(|p| p.samples).unwrap_or(0))?;
    render_timing(out, &indent, node)?;

    if parent.is_some() {
        writeln!(
            out,
            "{indent}- consumes {}% of the parent total time",
            (hotness * 100.0) as u32
        )?;
    }

    let children = forest.children_sorted(id);
    if !children.is_empty() {
        writeln!(out, "{indent}- of which:")?;
        writeln!(out)?;
        for child in children {
            render_node(out, forest, active, child, Some(node), depth + 1)?;
        }
    }

    writeln!(out, "{indent}</details>")?;
    Ok(())
}

/// How often the scope runs relative to its parent's calls.
fn render_frequency<W: Write>(
    out: &mut W,
    indent: &str,
    node: &ResultNode,
    parent_samples: u64,
) -> std::io::Result<()> {
    if parent_samples != 0 && node.samples != parent_samples {
        if node.samples > parent_samples {
            writeln!(
                out,
                "{indent}- happens about {} times per parent call (on average across {} samples)",
                node.samples / parent_samples,
                node.samples
            )
        } else {
            writeln!(
                out,
                "{indent}- has {}% chance to be called from parent (on average across {} samples)",
                node.samples * 100 / parent_samples,
                node.samples
            )
        }
    } else {
        writeln!(
            out,
            "{indent}- happens on each parent call ({} samples)",
            node.samples
        )
    }
}

fn render_timing<W: Write>(out: &mut W, indent: &str, node: &ResultNode) -> std::io::Result<()> {
    match node.samples {
        0 => writeln!(
            out,
            "{indent}- still running ({:.3} ms elapsed so far)",
            real_ms(node.total)
        ),
        1 => writeln!(out, "{indent}- total time: {:.3} ms", real_ms(node.total)),
        _ => {
            writeln!(
                out,
                "{indent}- min time per call: {:.3} ms",
                real_ms(node.min)
            )?;
            writeln!(
                out,
                "{indent}- avg time per call: {:.3} ms",
                real_ms(node.average)
            )?;
            writeln!(
                out,
                "{indent}- max time per call: {:.3} ms",
                real_ms(node.max)
            )?;
            writeln!(
                out,
                "{indent}- total time across {} calls: {:.3} ms",
                node.samples,
                real_ms(node.total)
            )
        }
    }
}

/// Share of the parent's total this node accounts for; 1.0 at forest roots.
fn relative_hotness(node: &ResultNode, parent: Option<&ResultNode>) -> f64 {
    let Some(parent) = parent else {
        return 1.0;
    };
    let parent_total = parent.total.as_secs_f64();
    if parent_total <= 0.0 {
        return 1.0;
    }
    (node.total.as_secs_f64() / parent_total).clamp(0.0, 1.0)
}

/// Two-segment gradient: cold → neutral over [0, 0.5), neutral → hot over
/// [0.5, 1].
fn hotness_color(hotness: f64) -> String {
    let t = hotness.clamp(0.0, 1.0);
    let (from, to, local) = if t < 0.5 {
        (COLD, NEUTRAL, t * 2.0)
    } else {
        (NEUTRAL, HOT, (t - 0.5) * 2.0)
    };

    let channel =
        |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * local).round() as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        channel(from[0], to[0]),
        channel(from[1], to[1]),
        channel(from[2], to[2])
    )
}

fn real_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

/// Escape HTML special characters so scope names cannot break the markup.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
