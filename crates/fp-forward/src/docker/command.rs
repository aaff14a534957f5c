//! Argument lists for the docker CLI invocations

use std::path::Path;
use std::time::Duration;

use fp_core::ContainerId;

/// Label the devcontainer CLI puts on containers it creates for a workspace
pub const LOCAL_FOLDER_LABEL: &str = "devcontainer.local_folder";

/// Label pointing at the devcontainer.json a container was built from
pub const CONFIG_FILE_LABEL: &str = "devcontainer.config_file";

/// `docker ps` listing running containers of a workspace, ids only
pub fn ps_args(workspace: &Path, config_path: &Path) -> Vec<String> {
    vec![
        "ps".to_string(),
        "-q".to_string(),
        "--filter".to_string(),
        format!("label={}={}", LOCAL_FOLDER_LABEL, workspace.display()),
        "--filter".to_string(),
        format!("label={}={}", CONFIG_FILE_LABEL, config_path.display()),
        "--filter".to_string(),
        "status=running".to_string(),
    ]
}

/// `docker inspect` printing the devcontainer metadata label
pub fn inspect_metadata_args(id: &ContainerId) -> Vec<String> {
    vec![
        "inspect".to_string(),
        "--format".to_string(),
        "{{ index .Config.Labels \"devcontainer.metadata\" }}".to_string(),
        id.to_string(),
    ]
}

/// `docker events` streaming container events of a workspace as JSON lines
pub fn events_args(workspace: &Path, config_path: &Path, since: Duration) -> Vec<String> {
    vec![
        "events".to_string(),
        "--filter".to_string(),
        "type=container".to_string(),
        "--filter".to_string(),
        format!("label={}={}", LOCAL_FOLDER_LABEL, workspace.display()),
        "--filter".to_string(),
        format!("label={}={}", CONFIG_FILE_LABEL, config_path.display()),
        "--format".to_string(),
        "json".to_string(),
        "--since".to_string(),
        format!("{}s", since.as_secs()),
    ]
}

/// `docker exec` relaying stdin/stdout to `localhost:<port>` in the container.
///
/// Runs socat as `remote_user` through a login shell, or as the container's
/// default user when `remote_user` is empty.
pub fn exec_args(id: &ContainerId, remote_user: &str, port: u16) -> Vec<String> {
    let socat = format!("socat - TCP:localhost:{}", port);
    let script = if remote_user.is_empty() {
        socat
    } else {
        format!("su - {} -c '{}'", remote_user, socat)
    };

    vec![
        "exec".to_string(),
        "-i".to_string(),
        id.to_string(),
        "bash".to_string(),
        "-c".to_string(),
        script,
    ]
}

/// Whether `user` can be spliced into the exec shell command as-is.
///
/// `$` is only accepted as the last character (machine accounts), where the
/// shell cannot expand it.
pub fn is_valid_user_name(user: &str) -> bool {
    let name = user.strip_suffix('$').unwrap_or(user);
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Render a command line for error messages
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
