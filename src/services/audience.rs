use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveTime;
use uuid::Uuid;

use crate::error::Result;
use crate::models::notification::{
    NotificationKind, NotificationPreference, SubjectNotificationPreference,
};
use crate::services::catalog::CatalogStore;
use crate::services::directory::UserDirectory;
use crate::services::preferences::PreferenceStore;

/// Computes the set of students entitled to a subject-scoped notification.
#[derive(Clone)]
pub struct AudienceResolver {
    directory: Arc<dyn UserDirectory>,
    catalog: Arc<dyn CatalogStore>,
    preferences: Arc<dyn PreferenceStore>,
}

impl AudienceResolver {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        catalog: Arc<dyn CatalogStore>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            directory,
            catalog,
            preferences,
        }
    }

    /// Active students whose level and major each appear in the subject's
    /// allowed sets. A student matching through several overlaps is counted
    /// once.
    pub async fn resolve_audience(&self, subject_id: Uuid) -> Result<Vec<Uuid>> {
        let (levels, majors) = self.catalog.subject_levels_and_majors(subject_id).await?;
        if levels.is_empty() || majors.is_empty() {
            return Ok(Vec::new());
        }
        let students = self
            .directory
            .find_students_by_levels_and_majors(&levels, &majors, true)
            .await?;
        let deduped: BTreeSet<Uuid> = students.into_iter().collect();
        Ok(deduped.into_iter().collect())
    }

    /// Preference gate for one recipient. Quiet hours are not consulted
    /// here; they withhold push delivery only, not history persistence.
    pub async fn allows(
        &self,
        user_id: Uuid,
        subject_id: Uuid,
        kind: NotificationKind,
    ) -> Result<bool> {
        let global = self.preferences.global_preference(user_id).await?;
        let subject = self
            .preferences
            .subject_preference(user_id, subject_id)
            .await?;
        Ok(preference_allows(global.as_ref(), subject.as_ref(), kind))
    }

    pub async fn quiet_hours_active(&self, user_id: Uuid, now: NaiveTime) -> Result<bool> {
        let global = self.preferences.global_preference(user_id).await?;
        Ok(global
            .as_ref()
            .map(|p| in_quiet_hours(p, now))
            .unwrap_or(false))
    }
}

/// A notification is suppressed when the global preference is missing or
/// disabled, the kind-specific toggle is off, or a subject override exists
/// and is disabled.
pub fn preference_allows(
    global: Option<&NotificationPreference>,
    subject: Option<&SubjectNotificationPreference>,
    kind: NotificationKind,
) -> bool {
    let Some(global) = global else {
        return false;
    };
    if !global.enabled {
        return false;
    }
    let kind_enabled = match kind {
        NotificationKind::NewDocument => global.new_content_enabled,
        NotificationKind::NewQuiz => global.quiz_enabled,
        NotificationKind::QuizClosing | NotificationKind::ProjectReminder => {
            global.deadline_enabled
        }
    };
    if !kind_enabled {
        return false;
    }
    if let Some(subject) = subject {
        if !subject.enabled {
            return false;
        }
    }
    true
}

/// Quiet-hours window check. The window is half-open [start, end) and may
/// wrap past midnight (22:00-06:00).
pub fn in_quiet_hours(pref: &NotificationPreference, now: NaiveTime) -> bool {
    let (Some(start), Some(end)) = (pref.quiet_hours_start, pref.quiet_hours_end) else {
        return false;
    };
    if start == end {
        return false;
    }
    if start < end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}
