//! Built-in release recipe
//!
//! Release directories live under `{{deploy_path}}/releases`, the lock file
//! at `{{deploy_path}}/.dep/deploy.lock`. The lock holds the name of the
//! release that took it; `deploy:unlock` only removes a lock held by the
//! current release, so a run that fails on someone else's lock leaves it
//! alone. Tasks defined later with the same name replace these.

use crate::graph::{TaskDescriptor, TaskGraph, TaskKind};
use crate::template::Template;

const INFO: &str = r#"echo "Deploying {{application}} to {{hostname}} ({{stage}})""#;

const PREPARE: &str = r#"set -e
[ -d {{deploy_path}} ] || mkdir -p {{deploy_path}}
cd {{deploy_path}}
mkdir -p .dep releases shared
if [ -e current ] && [ ! -L current ]; then
  echo "{{deploy_path}}/current exists and is not a symlink" >&2
  exit 1
fi"#;

const LOCK: &str = r#"if [ -f {{deploy_path}}/.dep/deploy.lock ]; then
  echo "Deploy locked." >&2
  exit 1
fi
echo "{{release_name}}" > {{deploy_path}}/.dep/deploy.lock"#;

const RELEASE: &str = r#"set -e
cd {{deploy_path}}
[ -h release ] && rm release
mkdir -p {{release_path}}
ln -sfn {{release_path}} release
echo "{{release_name}}" >> .dep/releases"#;

const UNLOCK: &str = r#"if [ "$(cat {{deploy_path}}/.dep/deploy.lock 2>/dev/null)" = "{{release_name}}" ]; then
  rm -f {{deploy_path}}/.dep/deploy.lock
elif [ -f {{deploy_path}}/.dep/deploy.lock ]; then
  echo "Lock held by another release, left in place." >&2
fi"#;

const FORCE_UNLOCK: &str = "rm -f {{deploy_path}}/.dep/deploy.lock";

const CLEANUP: &str = r#"set -e
cd {{deploy_path}}
if [ {{keep_releases}} -ge 0 ]; then
  current=$(readlink -f current 2>/dev/null || true)
  for dir in $(ls -1d releases/*/ 2>/dev/null | sort -r | tail -n +$(({{keep_releases}} + 1))); do
    [ "$(readlink -f "$dir")" = "$current" ] && continue
    rm -rf "$dir"
  done
fi
rm -f release"#;

const SUCCESS: &str = r#"echo "Successfully deployed {{application}} release {{release_name}}""#;

fn shell(name: &str, script: &str, description: &str) -> TaskDescriptor {
    TaskDescriptor::new(name, TaskKind::ShellCommand(Template::new(script)))
        .with_description(description)
}

/// The release-management tasks every deployment can reference
#[must_use]
pub fn common_tasks() -> Vec<TaskDescriptor> {
    vec![
        shell("deploy:info", INFO, "Displays info about deployment"),
        shell("deploy:prepare", PREPARE, "Prepares host for deploy"),
        shell("deploy:lock", LOCK, "Locks deploy"),
        shell("deploy:release", RELEASE, "Prepares release"),
        shell("deploy:unlock", UNLOCK, "Unlocks deploy"),
        shell(
            "deploy:unlock:force",
            FORCE_UNLOCK,
            "Removes the deploy lock whoever holds it",
        ),
        shell("cleanup", CLEANUP, "Cleaning up old releases"),
        shell("success", SUCCESS, "Reports a successful deployment"),
    ]
}

/// A graph pre-populated with `common_tasks`
#[must_use]
pub fn common() -> TaskGraph {
    let mut graph = TaskGraph::new();
    for task in common_tasks() {
        graph.insert(task);
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Vars;

    fn vars() -> Vars {
        [
            ("application", "pisc"),
            ("hostname", "194.67.112.124"),
            ("stage", "production"),
            ("deploy_path", "~/pisc"),
            ("release_name", "20261016093005"),
            ("release_path", "~/pisc/releases/20261016093005"),
            ("keep_releases", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_all_recipe_tasks_render() {
        let vars = vars();
        for task in common_tasks() {
            let TaskKind::ShellCommand(script) = &task.kind else {
                panic!("recipe task {} is not a shell command", task.name);
            };
            script
                .render(&vars)
                .unwrap_or_else(|e| panic!("{} does not render: {e}", task.name));
            assert!(task.description.is_some());
            assert!(!task.private);
        }
    }

    #[test]
    fn test_lock_and_unlock_share_path() {
        let graph = common();
        let render = |name: &str| match &graph.get(name).unwrap().kind {
            TaskKind::ShellCommand(t) => t.render(&vars()).unwrap(),
            other => panic!("unexpected kind {other:?}"),
        };

        assert!(render("deploy:lock").contains(r#"echo "20261016093005" > ~/pisc/.dep/deploy.lock"#));
        assert!(render("deploy:unlock").contains(r#"= "20261016093005" ]"#));
        assert_eq!(
            render("deploy:unlock:force"),
            "rm -f ~/pisc/.dep/deploy.lock"
        );
        assert!(render("deploy:release").contains("mkdir -p ~/pisc/releases/20261016093005"));
    }
}
