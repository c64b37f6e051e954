use std::str::FromStr;

/// Commands available inside the CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    ListDatabases,
    OpenDatabase(String),
    CreateDatabase(String),
    DropDatabase(String),
    ListTables,
    DescribeTable(String),
    DropTable(String),
}

/// Usage and description of every command, in the order `\?` lists them.
pub fn all_commands_info() -> Vec<(&'static str, &'static str)> {
    vec![
        ("\\l", "List databases"),
        ("\\c name", "Open a database"),
        ("\\create name", "Create a database and open it"),
        ("\\dropdb name", "Drop a database with all of its tables"),
        ("\\dt", "List tables of the open database"),
        ("\\d name", "Describe a table and its indexes"),
        ("\\drop name", "Drop a table"),
        ("\\?", "Show this help"),
        ("\\q", "Quit"),
    ]
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (c, arg) = if let Some((a, b)) = s.trim().split_once(' ') {
            (a, Some(b.trim()))
        } else {
            (s.trim(), None)
        };
        Ok(match (c, arg) {
            ("q", None) | ("quit", None) => Self::Quit,
            ("?", None) | ("h", None) => Self::Help,
            ("l", None) => Self::ListDatabases,
            ("c", Some(name)) | ("connect", Some(name)) => Self::OpenDatabase(name.into()),
            ("create", Some(name)) => Self::CreateDatabase(name.into()),
            ("dropdb", Some(name)) => Self::DropDatabase(name.into()),
            ("dt", None) | ("d", None) => Self::ListTables,
            ("d", Some(name)) => Self::DescribeTable(name.into()),
            ("drop", Some(name)) => Self::DropTable(name.into()),
            _ => return Err(()),
        })
    }
}
