use crate::models::{TeamDashboard, TeamSummary, TimeWindow};

#[derive(Debug, Clone)]
pub struct AppState {
    pub running: bool,
    pub demo: bool,
    pub window: TimeWindow,
    pub status: String,
    pub teams: Vec<TeamSummary>,
    pub selected_team: usize,
    pub dashboard: Option<TeamDashboard>,
    pub last_refresh: String,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            running: true,
            demo: false,
            window: TimeWindow::SevenDays,
            status: "ready".into(),
            teams: vec![],
            selected_team: 0,
            dashboard: None,
            last_refresh: "never".into(),
        }
    }
}

impl AppState {
    pub fn selected_team_id(&self) -> Option<&str> {
        self.teams
            .get(self.selected_team)
            .map(|t| t.team_id.as_str())
    }

    /// Moves to the next team, wrapping around.
    pub fn next_team(&mut self) {
        if !self.teams.is_empty() {
            self.selected_team = (self.selected_team + 1) % self.teams.len();
        }
    }

    /// Replaces the team list, keeping the current selection when that
    /// team is still present.
    pub fn set_teams(&mut self, teams: Vec<TeamSummary>) {
        let current = self.selected_team_id().map(ToString::to_string);
        self.selected_team = current
            .and_then(|id| teams.iter().position(|t| t.team_id == id))
            .unwrap_or(0);
        self.teams = teams;
    }
}
