//! Record/replay round-trip scenarios.

use crate::scene::SceneLayout;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// The XR rig walks around one room; replay must land on the recorded poses
    Walkabout,

    /// Recording crosses a scene change; replay must follow it and resume
    SceneHop,

    /// Identically named visitors must each replay onto their own instance
    Crowd,

    /// Seeking back to a time must reproduce what incremental replay showed
    Scrub,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Walkabout,
            ScenarioId::SceneHop,
            ScenarioId::Crowd,
            ScenarioId::Scrub,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Walkabout => "walkabout",
            ScenarioId::SceneHop => "scene_hop",
            ScenarioId::Crowd => "crowd",
            ScenarioId::Scrub => "scrub",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Walkabout => "Head and hands random walk, record then replay to the end",
            ScenarioId::SceneHop => "Scene change mid-recording, replay reloads the scene and resumes",
            ScenarioId::Crowd => "Six visitors sharing one path, replay binds them in order",
            ScenarioId::Scrub => "Seek back to mid-replay, compare with the incremental pass",
        }
    }

    /// Scene contents the scenario records in.
    pub fn layout(&self) -> SceneLayout {
        match self {
            ScenarioId::Crowd => SceneLayout {
                rig: true,
                visitors: 6,
                props: 2,
            },
            _ => SceneLayout::default(),
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "walkabout" => Ok(ScenarioId::Walkabout),
            "scene_hop" | "scenehop" => Ok(ScenarioId::SceneHop),
            "crowd" => Ok(ScenarioId::Crowd),
            "scrub" | "seek" => Ok(ScenarioId::Scrub),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert!("flash_mob".parse::<ScenarioId>().is_err());
    }
}
