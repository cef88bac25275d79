//! The quick-action catalog: the fixed set of diagnostic probes a kind's
//! configuration can reference by name, plus the command each one runs.

use std::collections::HashMap;
use std::path::PathBuf;

/// One diagnostic probe: read a file verbatim, or exec a command and
/// capture stdout.
#[derive(Debug, Clone)]
pub enum CommandSpec {
    Read(PathBuf),
    Exec(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct QuickAction {
    pub output_file_name: &'static str,
    pub command: CommandSpec,
}

/// The default catalog from the external-interfaces table. `interval`
/// substitution for `dmesg`/`journalctl` is the lookback window in
/// seconds; callers resolve it with [`QuickAction::resolve`].
pub fn default_catalog() -> HashMap<&'static str, QuickAction> {
    let mut catalog = HashMap::new();

    catalog.insert(
        "dmesg",
        QuickAction {
            output_file_name: "dmesg",
            command: CommandSpec::Exec(vec![
                "journalctl".into(),
                "-k".into(),
                "--since".into(),
                "{interval} seconds ago".into(),
            ]),
        },
    );
    catalog.insert(
        "journalctl",
        QuickAction {
            output_file_name: "journalctl",
            command: CommandSpec::Exec(vec![
                "journalctl".into(),
                "--since".into(),
                "{interval} seconds ago".into(),
            ]),
        },
    );
    catalog.insert(
        "syslogs",
        QuickAction {
            output_file_name: "syslogs",
            command: CommandSpec::Exec(vec!["tail".into(), "-n{lines}".into(), "/var/log/syslog".into()]),
        },
    );
    catalog.insert(
        "debugdata",
        QuickAction {
            output_file_name: "debugdata",
            command: CommandSpec::Read(PathBuf::from("/proc/fs/cifs/DebugData")),
        },
    );
    catalog.insert(
        "stats",
        QuickAction {
            output_file_name: "stats",
            command: CommandSpec::Read(PathBuf::from("/proc/fs/cifs/Stats")),
        },
    );
    catalog.insert(
        "mounts",
        QuickAction {
            output_file_name: "mounts",
            command: CommandSpec::Read(PathBuf::from("/proc/mounts")),
        },
    );
    catalog.insert(
        "smbinfo",
        QuickAction {
            output_file_name: "smbinfo",
            command: CommandSpec::Exec(vec!["smbinfo".into(), "-h".into(), "filebasicinfo".into()]),
        },
    );

    catalog
}

impl QuickAction {
    /// Substitute the `{interval}`/`{lines}` placeholders used by a
    /// handful of catalog entries. `interval_sec` is the lookback window
    /// in seconds; `lines` is how many trailing lines to tail.
    pub fn resolve(&self, interval_sec: u64, lines: u64) -> CommandSpec {
        match &self.command {
            CommandSpec::Read(path) => CommandSpec::Read(path.clone()),
            CommandSpec::Exec(argv) => CommandSpec::Exec(
                argv.iter()
                    .map(|arg| {
                        arg.replace("{interval}", &interval_sec.to_string())
                            .replace("{lines}", &lines.to_string())
                    })
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_all_seven_default_entries() {
        let catalog = default_catalog();
        for name in ["dmesg", "journalctl", "syslogs", "debugdata", "stats", "mounts", "smbinfo"] {
            assert!(catalog.contains_key(name), "missing catalog entry: {name}");
        }
        assert_eq!(catalog.len(), 7);
    }

    #[test]
    fn resolve_substitutes_interval_placeholder() {
        let catalog = default_catalog();
        let dmesg = &catalog["dmesg"];
        match dmesg.resolve(120, 0) {
            CommandSpec::Exec(argv) => {
                assert!(argv.iter().any(|a| a == "120 seconds ago"));
            }
            _ => panic!("expected exec command"),
        }
    }

    #[test]
    fn read_commands_are_unaffected_by_resolve() {
        let catalog = default_catalog();
        let stats = &catalog["stats"];
        match stats.resolve(60, 10) {
            CommandSpec::Read(path) => assert_eq!(path, PathBuf::from("/proc/fs/cifs/Stats")),
            _ => panic!("expected read command"),
        }
    }
}
