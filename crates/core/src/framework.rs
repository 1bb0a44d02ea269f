//! Framework Catalogue
//!
//! The fixed set of web application targets generated code is written for,
//! together with the per-framework facts the engine needs: sandbox template,
//! dev server command and port, build command, and build artifact directories.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CoreError;

/// A supported web application framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    #[default]
    Nextjs,
    Angular,
    React,
    Vue,
    Svelte,
}

impl Framework {
    /// Every framework, in classifier prompt order.
    pub const ALL: [Framework; 5] = [
        Framework::Nextjs,
        Framework::Angular,
        Framework::React,
        Framework::Vue,
        Framework::Svelte,
    ];

    /// Stable lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Nextjs => "nextjs",
            Framework::Angular => "angular",
            Framework::React => "react",
            Framework::Vue => "vue",
            Framework::Svelte => "svelte",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Framework::Nextjs => "Next.js",
            Framework::Angular => "Angular",
            Framework::React => "React",
            Framework::Vue => "Vue",
            Framework::Svelte => "SvelteKit",
        }
    }

    /// Sandbox template used when provisioning an environment for this framework.
    pub fn template_id(&self) -> &'static str {
        match self {
            Framework::Nextjs => "appforge-nextjs",
            Framework::Angular => "appforge-angular",
            Framework::React => "appforge-react",
            Framework::Vue => "appforge-vue",
            Framework::Svelte => "appforge-svelte",
        }
    }

    /// Port the dev server listens on.
    pub fn dev_port(&self) -> u16 {
        match self {
            Framework::Nextjs => 3000,
            Framework::Angular => 4200,
            Framework::React | Framework::Vue | Framework::Svelte => 5173,
        }
    }

    /// Program and arguments that start the dev server in the background.
    pub fn dev_command(&self) -> (&'static str, Vec<String>) {
        let args: &[&str] = match self {
            Framework::Nextjs => &["run", "dev", "--", "--hostname", "0.0.0.0"],
            Framework::Angular => &["run", "start", "--", "--host", "0.0.0.0", "--port", "4200"],
            Framework::React | Framework::Vue | Framework::Svelte => {
                &["run", "dev", "--", "--host", "0.0.0.0", "--port", "5173"]
            }
        };
        ("npm", args.iter().map(|a| a.to_string()).collect())
    }

    /// Shell command used by build validation.
    pub fn build_command(&self) -> &'static str {
        "npm run build"
    }

    /// Directories removed before a validation build.
    pub fn artifact_dirs(&self) -> &'static [&'static str] {
        match self {
            Framework::Nextjs => &[".next"],
            Framework::Angular => &["dist", ".angular/cache"],
            Framework::React | Framework::Vue => &["dist", "node_modules/.vite"],
            Framework::Svelte => &[".svelte-kit", "build"],
        }
    }

    /// Find the first framework named in free text (used to parse classifier output).
    pub fn find_in(text: &str) -> Option<Framework> {
        let lower = text.to_lowercase();
        let aliases: [(&str, Framework); 7] = [
            ("nextjs", Framework::Nextjs),
            ("next.js", Framework::Nextjs),
            ("angular", Framework::Angular),
            ("sveltekit", Framework::Svelte),
            ("svelte", Framework::Svelte),
            ("vue", Framework::Vue),
            ("react", Framework::React),
        ];
        aliases
            .iter()
            .filter_map(|(alias, fw)| lower.find(alias).map(|pos| (pos, *fw)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, fw)| fw)
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Framework {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nextjs" | "next.js" | "next" => Ok(Framework::Nextjs),
            "angular" => Ok(Framework::Angular),
            "react" => Ok(Framework::React),
            "vue" => Ok(Framework::Vue),
            "svelte" | "sveltekit" => Ok(Framework::Svelte),
            other => Err(CoreError::parse(format!("unknown framework '{}'", other))),
        }
    }
}
