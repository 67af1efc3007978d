use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::error;

use crate::{
    error::{DeskError, DeskResult},
    models::{DailySummary, Session, SessionStatus, TherapistPayout},
};

/// Active and completed sessions for one business day.
///
/// Not synchronized; callers serialize access (the desk keeps it behind its
/// state mutex).
#[derive(Debug, Clone)]
pub struct SessionStore {
    business_day: NaiveDate,
    active: Vec<Session>,
    completed: Vec<Session>,
}

impl SessionStore {
    pub fn new(business_day: NaiveDate) -> Self {
        Self {
            business_day,
            active: Vec::new(),
            completed: Vec::new(),
        }
    }

    pub fn business_day(&self) -> NaiveDate {
        self.business_day
    }

    pub fn find(&self, id: &str) -> Option<&Session> {
        self.active
            .iter()
            .chain(self.completed.iter())
            .find(|session| session.id == id)
    }

    pub fn find_active(&self, id: &str) -> Option<&Session> {
        self.active.iter().find(|session| session.id == id)
    }

    pub fn find_active_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.active.iter_mut().find(|session| session.id == id)
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.iter().any(|session| session.id == id)
    }

    /// Returns false (and inserts nothing) when the id is already known.
    pub fn add_active(&mut self, session: Session) -> bool {
        if self.find(&session.id).is_some() {
            error!("Session {} is already tracked; ignoring duplicate insert", session.id);
            return false;
        }
        self.active.push(session);
        true
    }

    /// Loads an already-completed session, e.g. when hydrating from disk.
    pub fn add_completed(&mut self, mut session: Session) -> bool {
        if self.find(&session.id).is_some() {
            error!("Session {} is already tracked; ignoring duplicate insert", session.id);
            return false;
        }
        session.status = SessionStatus::Completed;
        self.completed.push(session);
        true
    }

    pub fn move_to_completed(&mut self, id: &str) -> DeskResult<&Session> {
        let index = self
            .active
            .iter()
            .position(|session| session.id == id)
            .ok_or_else(|| DeskError::not_found("session", id))?;

        let mut session = self.active.remove(index);
        session.status = SessionStatus::Completed;
        self.completed.push(session);
        Ok(&self.completed[self.completed.len() - 1])
    }

    pub fn remove_active(&mut self, id: &str) -> Option<Session> {
        let index = self.active.iter().position(|session| session.id == id)?;
        Some(self.active.remove(index))
    }

    pub fn active(&self) -> &[Session] {
        &self.active
    }

    pub fn completed(&self) -> &[Session] {
        &self.completed
    }

    pub fn in_progress(&self) -> impl Iterator<Item = &Session> {
        self.active
            .iter()
            .filter(|session| session.status == SessionStatus::InProgress)
    }

    pub fn summary(&self) -> DailySummary {
        let mut by_therapist: BTreeMap<&str, TherapistPayout> = BTreeMap::new();
        let mut revenue = 0.0;
        let mut payouts = 0.0;

        for session in &self.completed {
            revenue += session.price;
            for therapist_id in &session.therapist_ids {
                payouts += session.payout;
                let entry = by_therapist
                    .entry(therapist_id.as_str())
                    .or_insert_with(|| TherapistPayout {
                        therapist_id: therapist_id.clone(),
                        sessions: 0,
                        payout: 0.0,
                    });
                entry.sessions += 1;
                entry.payout += session.payout;
            }
        }

        DailySummary {
            business_day: Some(self.business_day),
            completed_sessions: self.completed.len(),
            active_sessions: self.active.len(),
            revenue,
            payouts,
            payouts_by_therapist: by_therapist.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn session(id: &str, therapists: &[&str]) -> Session {
        let created = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        Session {
            id: id.into(),
            service_id: "swedish-60".into(),
            therapist_ids: therapists.iter().map(|t| t.to_string()).collect(),
            room_id: "r1".into(),
            status: SessionStatus::Ready,
            start_time: None,
            end_time: None,
            duration_minutes: 60,
            price: 100.0,
            payout: 45.0,
            booking_id: None,
            business_day: created.date_naive(),
            created_at: created,
            updated_at: created,
        }
    }

    fn store() -> SessionStore {
        SessionStore::new(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap())
    }

    #[test]
    fn add_then_find_returns_equal_session() {
        let mut store = store();
        let s = session("s1", &["t1"]);

        assert!(store.add_active(s.clone()));
        assert_eq!(store.find("s1"), Some(&s));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut store = store();
        assert!(store.add_active(session("s1", &["t1"])));
        assert!(!store.add_active(session("s1", &["t2"])));
        assert_eq!(store.active().len(), 1);
        assert_eq!(store.active()[0].therapist_ids, vec!["t1".to_string()]);
    }

    #[test]
    fn move_to_completed_keeps_session_findable() {
        let mut store = store();
        store.add_active(session("s1", &["t1"]));

        let moved = store.move_to_completed("s1").unwrap();
        assert_eq!(moved.status, SessionStatus::Completed);

        assert!(store.find_active("s1").is_none());
        assert_eq!(store.find("s1").unwrap().status, SessionStatus::Completed);
        assert!(store.is_completed("s1"));
    }

    #[test]
    fn move_unknown_session_is_not_found() {
        let mut store = store();
        let err = store.move_to_completed("missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn summary_splits_payout_per_therapist() {
        let mut store = store();
        store.add_active(session("s1", &["t1"]));
        store.add_active(session("s2", &["t1", "t2"]));
        store.add_active(session("s3", &["t2"]));
        store.move_to_completed("s1").unwrap();
        store.move_to_completed("s2").unwrap();

        let summary = store.summary();
        assert_eq!(summary.completed_sessions, 2);
        assert_eq!(summary.active_sessions, 1);
        assert_eq!(summary.revenue, 200.0);
        assert_eq!(summary.payouts, 135.0);
        assert_eq!(summary.payouts_by_therapist.len(), 2);
        assert_eq!(summary.payouts_by_therapist[0].therapist_id, "t1");
        assert_eq!(summary.payouts_by_therapist[0].sessions, 2);
        assert_eq!(summary.payouts_by_therapist[1].payout, 45.0);
    }
}
