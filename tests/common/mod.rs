//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, Duration, Local, Utc};
use mockable::Clock;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;
use yamdb_api::{
    AppConfig, AppState, ClockState, InMemoryRepository, MockMailer,
    auth::AuthUser,
    models::{Role, User},
};

/// A clock tests can move forward.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    fn lock_clock(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn utc_now(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.lock_clock();
        *now += by;
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

/// Everything a test needs a handle on after the state has been assembled.
pub struct TestContext {
    pub state: AppState,
    pub repo: Arc<InMemoryRepository>,
    pub mailer: MockMailer,
    pub clock: Arc<MutableClock>,
}

pub fn test_context() -> TestContext {
    test_context_with(AppConfig::default(), MockMailer::new())
}

pub fn test_context_with(config: AppConfig, mailer: MockMailer) -> TestContext {
    let repo = Arc::new(InMemoryRepository::new());
    let clock = Arc::new(MutableClock::new(Utc::now()));
    let state = AppState {
        repo: repo.clone(),
        mailer: Arc::new(mailer.clone()),
        clock: clock.clone() as ClockState,
        config,
    };
    TestContext {
        state,
        repo,
        mailer,
        clock,
    }
}

/// Inserts a user straight into the store and returns it.
pub fn seed_user(repo: &InMemoryRepository, username: &str, role: Role) -> User {
    let user = User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: format!("{username}@example.com"),
        role,
        date_joined: Utc::now(),
        ..User::default()
    };
    repo.seed_user(user.clone());
    user
}

pub fn identity(user: &User) -> AuthUser {
    AuthUser::from(user)
}
