use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets};

use crate::config::SolverKind;

/// One iteration of a Krylov solver.
///
/// `beta` holds the direction update coefficient for CG/BiCG and the
/// stabilization weight `omega` for BiCGSTAB.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub solver: SolverKind,
    pub iteration: usize,
    pub residual: f64,
    pub alpha: f64,
    pub beta: f64,
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

/// Receives per-iteration diagnostics from the iterative solvers.
pub trait Reporter {
    fn on_iteration(&mut self, report: &IterationReport);
    fn on_finish(&mut self) {}
}

/// Collects iterations and prints them as one table when the solve finishes.
pub struct StdoutReporter {
    rows: Vec<IterationReport>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        let Some(first) = self.rows.first() else {
            return;
        };
        let beta_label = match first.solver {
            SolverKind::BiCgStab => "omega",
            _ => "beta",
        };
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        emit_line(&format!("solver: {}", first.solver));
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("iter").set_alignment(CellAlignment::Right),
            Cell::new("residual").set_alignment(CellAlignment::Right),
            Cell::new("alpha").set_alignment(CellAlignment::Right),
            Cell::new(beta_label).set_alignment(CellAlignment::Right),
        ]);
        for row in &self.rows {
            table.add_row(vec![
                Cell::new(row.iteration).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.residual)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3e}", row.alpha)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3e}", row.beta)).set_alignment(CellAlignment::Right),
            ]);
        }

        for line in table.to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
    }
}
