//! First-level FEAT design: EV files and a stats-only `.fsf` setup per run

use super::contrast::Contrast;
use super::specify::SessionInfo;
use crate::error::FlowError;
use crate::helpers::format_g;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// FEAT convolution code for the double-gamma HRF
const CONVOLVE_DGAMMA: u32 = 3;
/// FEAT EV shapes
const SHAPE_SINGLE_COLUMN: u32 = 2;
const SHAPE_THREE_COLUMN: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level1Design {
    /// Repetition time in seconds
    pub interscan_interval: f64,
    /// Add temporal derivatives of the double-gamma HRF
    pub derivs: bool,
    /// Prewhitening (serial correlation modelling)
    pub model_serial_correlations: bool,
    #[serde(default)]
    pub contrasts: Vec<Contrast>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Level1Outputs {
    pub fsf_files: Vec<PathBuf>,
    /// EV files of each run, in EV order
    pub ev_files: Vec<Vec<PathBuf>>,
}

impl Level1Design {
    pub fn new(interscan_interval: f64) -> Self {
        Self {
            interscan_interval,
            derivs: true,
            model_serial_correlations: true,
            contrasts: Vec::new(),
        }
    }

    /// Write EV files and one `run<N>.fsf` per session into `out_dir`
    pub fn write(&self, sessions: &[SessionInfo], out_dir: &Path) -> Result<Level1Outputs, FlowError> {
        fs::create_dir_all(out_dir)?;
        let mut outputs = Level1Outputs::default();

        for (run, session) in sessions.iter().enumerate() {
            let npts = session.npts().ok_or_else(|| {
                FlowError::Unsupported("a first-level design without regressors".to_string())
            })?;

            let mut ev_files = Vec::new();
            let mut ev_num = 0;
            for cond in &session.cond {
                ev_num += 1;
                let path = out_dir.join(ev_file_name(&cond.name, run, ev_num));
                let mut content = String::new();
                for ((onset, duration), amplitude) in
                    cond.onset.iter().zip(&cond.duration).zip(&cond.amplitudes)
                {
                    let _ = writeln!(
                        content,
                        "{} {} {}",
                        format_g(*onset),
                        format_g(*duration),
                        format_g(*amplitude)
                    );
                }
                fs::write(&path, content)?;
                ev_files.push(path);
            }
            for reg in &session.regress {
                ev_num += 1;
                let path = out_dir.join(ev_file_name(&reg.name, run, ev_num));
                let content: String = reg.val.iter().map(|v| format!("{}\n", format_g(*v))).collect();
                fs::write(&path, content)?;
                ev_files.push(path);
            }

            let fsf = self.render_fsf(session, run, npts, &ev_files);
            let fsf_path = out_dir.join(format!("run{}.fsf", run));
            fs::write(&fsf_path, fsf)?;
            log::debug!("Wrote {} ({} EVs)", fsf_path.display(), ev_files.len());

            outputs.fsf_files.push(fsf_path);
            outputs.ev_files.push(ev_files);
        }

        Ok(outputs)
    }

    /// Real (design-matrix) column count of each original EV, in EV order
    fn real_columns(&self, session: &SessionInfo) -> Vec<usize> {
        let per_cond = if self.derivs { 2 } else { 1 };
        session
            .cond
            .iter()
            .map(|_| per_cond)
            .chain(session.regress.iter().map(|_| 1))
            .collect()
    }

    fn render_fsf(&self, session: &SessionInfo, run: usize, npts: usize, ev_files: &[PathBuf]) -> String {
        let columns = self.real_columns(session);
        let evs_orig = columns.len();
        let evs_real: usize = columns.iter().sum();
        let ncon = self.contrasts.len();

        let mut s = String::new();
        let _ = writeln!(s, "# FEAT version number\nset fmri(version) 6.00");
        let _ = writeln!(s, "set fmri(inmelodic) 0");
        let _ = writeln!(s, "set fmri(level) 1");
        // 2 = statistics only
        let _ = writeln!(s, "set fmri(analysis) 2");
        let _ = writeln!(s, "set fmri(relative_yn) 0");
        let _ = writeln!(s, "set fmri(help_yn) 1");
        let _ = writeln!(s, "set fmri(featwatcher_yn) 0");
        let _ = writeln!(s, "set fmri(sscleanup_yn) 0");
        let _ = writeln!(s, "set fmri(outputdir) \"run{}\"", run);
        let _ = writeln!(s, "set fmri(tr) {}", format_g(self.interscan_interval));
        let _ = writeln!(s, "set fmri(npts) {}", npts);
        let _ = writeln!(s, "set fmri(ndelete) 0");
        let _ = writeln!(s, "set fmri(tagfirst) 1");
        let _ = writeln!(s, "set fmri(multiple) 1");
        let _ = writeln!(s, "set fmri(inputtype) 1");
        let _ = writeln!(s, "set fmri(filtering_yn) 0");
        let _ = writeln!(s, "set fmri(brain_thresh) 10");
        let _ = writeln!(s, "set fmri(critical_z) 5.3");
        let _ = writeln!(s, "set fmri(noise) 0.66");
        let _ = writeln!(s, "set fmri(noisear) 0.34");
        let _ = writeln!(s, "set fmri(mc) 0");
        let _ = writeln!(s, "set fmri(st) 0");
        let _ = writeln!(s, "set fmri(bet_yn) 0");
        let _ = writeln!(s, "set fmri(smooth) 0");
        let _ = writeln!(s, "set fmri(norm_yn) 0");
        let _ = writeln!(s, "set fmri(perfsub_yn) 0");
        let _ = writeln!(s, "set fmri(temphp_yn) 1");
        let _ = writeln!(s, "set fmri(templp_yn) 0");
        let _ = writeln!(s, "set fmri(melodic_yn) 0");
        let _ = writeln!(s, "set fmri(stats_yn) 1");
        let _ = writeln!(s, "set fmri(prewhiten_yn) {}", self.model_serial_correlations as u8);
        let _ = writeln!(s, "set fmri(motionevs) 0");
        let _ = writeln!(s, "set fmri(robust_yn) 0");
        let _ = writeln!(s, "set fmri(mixed_yn) 2");
        let _ = writeln!(s, "set fmri(evs_orig) {}", evs_orig);
        let _ = writeln!(s, "set fmri(evs_real) {}", evs_real);
        let _ = writeln!(s, "set fmri(evs_vox) 0");
        let _ = writeln!(s, "set fmri(ncon_orig) {}", ncon);
        let _ = writeln!(s, "set fmri(ncon_real) {}", ncon);
        let _ = writeln!(s, "set fmri(nftests_orig) 0");
        let _ = writeln!(s, "set fmri(nftests_real) 0");
        let _ = writeln!(s, "set fmri(constcol) 0");
        let _ = writeln!(s, "set fmri(poststats_yn) 0");
        let _ = writeln!(s, "set fmri(reg_yn) 0");
        let _ = writeln!(s, "set fmri(paradigm_hp) {}", format_g(session.hpf));
        let _ = writeln!(s, "set feat_files(1) \"{}\"", session.scans.display());

        let names = session
            .cond
            .iter()
            .map(|c| c.name.as_str())
            .chain(session.regress.iter().map(|r| r.name.as_str()));
        for (i, (name, file)) in names.zip(ev_files).enumerate() {
            let ev = i + 1;
            let is_condition = i < session.cond.len();
            let _ = writeln!(s, "\n# EV {} title\nset fmri(evtitle{}) \"{}\"", ev, ev, name);
            if is_condition {
                let _ = writeln!(s, "set fmri(shape{}) {}", ev, SHAPE_THREE_COLUMN);
                let _ = writeln!(s, "set fmri(convolve{}) {}", ev, CONVOLVE_DGAMMA);
                let _ = writeln!(s, "set fmri(deriv_yn{}) {}", ev, self.derivs as u8);
            } else {
                let _ = writeln!(s, "set fmri(shape{}) {}", ev, SHAPE_SINGLE_COLUMN);
                let _ = writeln!(s, "set fmri(convolve{}) 0", ev);
                let _ = writeln!(s, "set fmri(deriv_yn{}) 0", ev);
            }
            let _ = writeln!(s, "set fmri(convolve_phase{}) 0", ev);
            let _ = writeln!(s, "set fmri(tempfilt_yn{}) 1", ev);
            let _ = writeln!(s, "set fmri(custom{}) \"{}\"", ev, file.display());
            for j in 0..=evs_orig {
                let _ = writeln!(s, "set fmri(ortho{}.{}) 0", ev, j);
            }
        }

        let _ = writeln!(s, "\nset fmri(con_mode_old) real\nset fmri(con_mode) real");
        for (c, contrast) in self.contrasts.iter().enumerate() {
            let con = c + 1;
            let _ = writeln!(s, "set fmri(conpic_real.{}) 1", con);
            let _ = writeln!(s, "set fmri(conname_real.{}) \"{}\"", con, contrast.name);
            let _ = writeln!(s, "set fmri(conname_orig.{}) \"{}\"", con, contrast.name);

            let mut real = 1;
            for (i, width) in columns.iter().enumerate() {
                let weight = session
                    .cond
                    .get(i)
                    .map(|cond| contrast.weight_for(&cond.name))
                    .unwrap_or(0.0);
                let _ = writeln!(s, "set fmri(con_orig{}.{}) {}", con, i + 1, format_g(weight));
                for k in 0..*width {
                    // Derivative columns get no weight
                    let w = if k == 0 { weight } else { 0.0 };
                    let _ = writeln!(s, "set fmri(con_real{}.{}) {}", con, real, format_g(w));
                    real += 1;
                }
            }
        }

        s
    }
}

fn ev_file_name(name: &str, run: usize, ev: usize) -> String {
    let clean: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("ev_{}_{}_{}.txt", clean, run, ev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Condition, Regressor};
    use tempfile::TempDir;

    fn session() -> SessionInfo {
        SessionInfo {
            scans: "/data/smooth.nii.gz".into(),
            hpf: 100.0,
            cond: vec![
                Condition {
                    name: "go".into(),
                    onset: vec![0.0, 10.5],
                    duration: vec![1.0, 1.0],
                    amplitudes: vec![1.0, 1.0],
                },
                Condition {
                    name: "stop signal".into(),
                    onset: vec![5.0],
                    duration: vec![2.0],
                    amplitudes: vec![1.0],
                },
            ],
            regress: vec![Regressor {
                name: "dvars".into(),
                val: vec![0.0, 1.5, 2.0, 0.5],
            }],
        }
    }

    #[test]
    fn test_ev_files_written() {
        let dir = TempDir::new().unwrap();
        let out = Level1Design::new(2.0).write(&[session()], dir.path()).unwrap();
        assert_eq!(out.fsf_files, vec![dir.path().join("run0.fsf")]);
        assert_eq!(out.ev_files[0].len(), 3);
        assert!(out.ev_files[0][1].ends_with("ev_stop_signal_0_2.txt"));

        let go = fs::read_to_string(&out.ev_files[0][0]).unwrap();
        assert_eq!(go, "0 1 1\n10.5 1 1\n");
        let dvars = fs::read_to_string(&out.ev_files[0][2]).unwrap();
        assert_eq!(dvars, "0\n1.5\n2\n0.5\n");
    }

    #[test]
    fn test_fsf_settings() {
        let dir = TempDir::new().unwrap();
        let mut design = Level1Design::new(2.0);
        design.contrasts = vec![Contrast::t("go>stop", &["go", "stop signal"], &[1.0, -1.0])];
        let out = design.write(&[session()], dir.path()).unwrap();
        let fsf = fs::read_to_string(&out.fsf_files[0]).unwrap();

        assert!(fsf.contains("set fmri(tr) 2\n"));
        assert!(fsf.contains("set fmri(npts) 4\n"));
        assert!(fsf.contains("set fmri(paradigm_hp) 100\n"));
        assert!(fsf.contains("set fmri(prewhiten_yn) 1\n"));
        assert!(fsf.contains("set fmri(evs_orig) 3\n"));
        // two conditions with derivatives plus one regressor
        assert!(fsf.contains("set fmri(evs_real) 5\n"));
        assert!(fsf.contains("set fmri(convolve1) 3\n"));
        assert!(fsf.contains("set fmri(convolve3) 0\n"));
        assert!(fsf.contains("set fmri(con_real1.1) 1\n"));
        assert!(fsf.contains("set fmri(con_real1.2) 0\n"));
        assert!(fsf.contains("set fmri(con_real1.3) -1\n"));
        assert!(fsf.contains("set fmri(con_real1.5) 0\n"));
    }

    #[test]
    fn test_no_contrasts_by_default() {
        let dir = TempDir::new().unwrap();
        let out = Level1Design::new(2.0).write(&[session()], dir.path()).unwrap();
        let fsf = fs::read_to_string(&out.fsf_files[0]).unwrap();
        assert!(fsf.contains("set fmri(ncon_real) 0\n"));
        assert!(!fsf.contains("conname_real"));
    }

    #[test]
    fn test_requires_timepoint_count() {
        let dir = TempDir::new().unwrap();
        let mut s = session();
        s.regress.clear();
        assert!(Level1Design::new(2.0).write(&[s], dir.path()).is_err());
    }
}
