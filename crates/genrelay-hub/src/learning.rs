//! Learning-plan coach — built-in courses and per-user day navigation.
//!
//! Progress lives in the [`ProgressStore`] the coach is given. The coach
//! only keeps a lock per user so that read-modify-write sequences for the
//! same user run one at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::info;

use genrelay_core::error::GenRelayError;
use genrelay_core::progress::{ProgressStore, UserProgress};

/// A fixed sequence of daily tasks.
#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub id: &'static str,
    pub name: &'static str,
    pub days: &'static [&'static str],
}

impl Course {
    pub fn total_days(&self) -> u32 {
        self.days.len() as u32
    }

    /// Task for a 1-based day.
    pub fn day(&self, day: u32) -> Option<&'static str> {
        let index = usize::try_from(day).ok()?.checked_sub(1)?;
        self.days.get(index).copied()
    }
}

pub static COURSES: &[Course] = &[
    Course {
        id: "python_7",
        name: "Python in 7 days",
        days: &[
            "DAY 1: Install Python and write your first script.\n\n\
             1. Install Python from python.org\n\
             2. Write a script that prints your name and age\n\
             3. Run it from the terminal",
            "DAY 2: Conditions and logic.\n\n\
             1. Write a script that checks your age\n\
             2. Over 18 prints 'Access granted', otherwise 'Access denied'\n\
             3. Handle empty input",
            "DAY 3: Loops and lists.\n\n\
             1. Create a list of 5 numbers\n\
             2. Print each element in a loop\n\
             3. Sum all numbers in the list",
            "DAY 4: Functions.\n\n\
             1. Write a function for the area of a circle\n\
             2. Write a function that checks whether a number is even\n\
             3. Call both with different arguments",
            "DAY 5: Working with files.\n\n\
             1. Create a text file\n\
             2. Write a few lines to it\n\
             3. Read it back and print the contents",
            "DAY 6: Libraries and APIs.\n\n\
             1. Install the requests library with pip\n\
             2. Call a public API\n\
             3. Parse and print the result",
            "DAY 7: Final project.\n\n\
             1. Build a simple chat bot\n\
             2. Or write a web scraper\n\
             3. Or automate something you do every day",
        ],
    },
    Course {
        id: "nodejs_7",
        name: "Node.js in 7 days",
        days: &[
            "DAY 1: Setup and your first server.\n\n\
             1. Install Node.js from nodejs.org\n\
             2. Create server.js\n\
             3. Start a plain HTTP server",
            "DAY 2: Modules and npm.\n\n\
             1. Learn the module system\n\
             2. Install express with npm\n\
             3. Add a simple route",
            "DAY 3: Express.\n\n\
             1. Set up a basic Express app\n\
             2. Add several GET routes\n\
             3. Serve a simple HTML template",
            "DAY 4: Middleware and POST requests.\n\n\
             1. Add logging middleware\n\
             2. Handle a form POST\n\
             3. Parse request bodies",
            "DAY 5: Databases.\n\n\
             1. Connect MongoDB or SQLite\n\
             2. Define a simple model\n\
             3. Implement CRUD operations",
            "DAY 6: APIs and authentication.\n\n\
             1. Build a REST API\n\
             2. Add JWT authentication\n\
             3. Protect some routes",
            "DAY 7: Deploy.\n\n\
             1. Deploy the app to a hosting provider\n\
             2. Configure a domain and TLS\n\
             3. Test every endpoint",
        ],
    },
];

const MOTIVATION: &[&str] = &[
    "Great progress, keep going!",
    "Unstoppable. On to the next one!",
    "Onward. Next task below.",
    "Don't slow down now!",
];

pub fn find_course(id: &str) -> Option<&'static Course> {
    COURSES.iter().find(|c| c.id == id)
}

#[derive(Error, Debug)]
pub enum LearningError {
    #[error("unknown course: {0}")]
    UnknownCourse(String),

    #[error("no active course; start one first")]
    NoActiveCourse,

    #[error("already on the first day")]
    FirstDay,

    #[error("already on the last day; finish the course instead")]
    LastDay,

    #[error(transparent)]
    Store(#[from] GenRelayError),
}

/// A task handed to the user, with an optional lead-in line.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Task {
    pub course: &'static str,
    pub day: u32,
    pub total_days: u32,
    pub text: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressReport {
    pub course: &'static str,
    pub completed: u32,
    pub total: u32,
    pub percent: f64,
    pub current_day: u32,
    pub start_date: NaiveDate,
    pub bar: String,
}

pub struct LearningCoach<S> {
    store: S,
    user_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: ProgressStore> LearningCoach<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Hold the write lock for one user until the guard drops.
    async fn lock_user(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.user_locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries nobody holds or waits on are dropped.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(user_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn courses(&self) -> &'static [Course] {
        COURSES
    }

    /// Register a user if unseen and return their progress.
    pub async fn enroll(&self, user_id: i64) -> Result<UserProgress, LearningError> {
        let _guard = self.lock_user(user_id).await;
        if let Some(p) = self.store.get(user_id).await? {
            return Ok(p);
        }
        let p = UserProgress::new();
        self.store.put(user_id, &p).await?;
        info!("Enrolled user {}", user_id);
        Ok(p)
    }

    pub async fn start_course(&self, user_id: i64, course_id: &str) -> Result<Task, LearningError> {
        let course =
            find_course(course_id).ok_or_else(|| LearningError::UnknownCourse(course_id.to_string()))?;

        let progress = UserProgress {
            current_course: Some(course.id.to_string()),
            current_day: 1,
            start_date: Local::now().date_naive(),
            completed_days: Vec::new(),
        };
        let _guard = self.lock_user(user_id).await;
        self.store.put(user_id, &progress).await?;
        info!("User {} started {}", user_id, course.id);

        Ok(task(course, 1, None))
    }

    pub async fn today(&self, user_id: i64) -> Result<Task, LearningError> {
        let (course, progress) = self.active(user_id).await?;
        Ok(task(course, progress.current_day, None))
    }

    pub async fn next_day(&self, user_id: i64) -> Result<Task, LearningError> {
        let _guard = self.lock_user(user_id).await;
        let (course, mut progress) = self.active(user_id).await?;
        if progress.current_day >= course.total_days() {
            return Err(LearningError::LastDay);
        }

        let done = progress.current_day;
        if !progress.completed_days.contains(&done) {
            progress.completed_days.push(done);
        }
        progress.current_day += 1;
        self.store.put(user_id, &progress).await?;

        let note = MOTIVATION[done as usize % MOTIVATION.len()];
        Ok(task(course, progress.current_day, Some(note)))
    }

    pub async fn previous_day(&self, user_id: i64) -> Result<Task, LearningError> {
        let _guard = self.lock_user(user_id).await;
        let (course, mut progress) = self.active(user_id).await?;
        if progress.current_day <= 1 {
            return Err(LearningError::FirstDay);
        }

        progress.current_day -= 1;
        self.store.put(user_id, &progress).await?;

        Ok(task(course, progress.current_day, Some("Repetition is the mother of learning.")))
    }

    pub async fn progress(&self, user_id: i64) -> Result<ProgressReport, LearningError> {
        let (course, progress) = self.active(user_id).await?;
        let total = course.total_days();
        let completed = (progress.completed_days.len() as u32).min(total);

        Ok(ProgressReport {
            course: course.name,
            completed,
            total,
            percent: f64::from(completed) / f64::from(total) * 100.0,
            current_day: progress.current_day,
            start_date: progress.start_date,
            bar: format!(
                "{}{}",
                "🟢".repeat(completed as usize),
                "⚪".repeat((total - completed) as usize)
            ),
        })
    }

    /// Close the current course and return its name.
    pub async fn finish(&self, user_id: i64) -> Result<&'static str, LearningError> {
        let _guard = self.lock_user(user_id).await;
        let (course, mut progress) = self.active(user_id).await?;
        progress.current_course = None;
        progress.current_day = 1;
        self.store.put(user_id, &progress).await?;
        info!("User {} finished {}", user_id, course.id);
        Ok(course.name)
    }

    async fn active(&self, user_id: i64) -> Result<(&'static Course, UserProgress), LearningError> {
        let progress = self
            .store
            .get(user_id)
            .await?
            .ok_or(LearningError::NoActiveCourse)?;
        let course = progress
            .current_course
            .as_deref()
            .and_then(find_course)
            .ok_or(LearningError::NoActiveCourse)?;
        Ok((course, progress))
    }
}

fn task(course: &'static Course, day: u32, note: Option<&'static str>) -> Task {
    Task {
        course: course.id,
        day,
        total_days: course.total_days(),
        text: course.day(day).unwrap_or_default(),
        note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use genrelay_core::error::Result as StoreResult;
    use genrelay_core::progress::InMemoryProgressStore;
    use std::time::Duration;

    /// Store whose reads take a while, so overlapping updates interleave.
    struct SlowStore(InMemoryProgressStore);

    #[async_trait]
    impl ProgressStore for SlowStore {
        async fn get(&self, user_id: i64) -> StoreResult<Option<UserProgress>> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.0.get(user_id).await
        }

        async fn put(&self, user_id: i64, progress: &UserProgress) -> StoreResult<()> {
            self.0.put(user_id, progress).await
        }
    }

    fn coach() -> LearningCoach<InMemoryProgressStore> {
        LearningCoach::new(InMemoryProgressStore::new())
    }

    #[test]
    fn test_catalogue_days() {
        for course in COURSES {
            assert_eq!(course.total_days(), 7);
            assert!(course.day(0).is_none());
            assert!(course.day(1).unwrap().starts_with("DAY 1"));
            assert!(course.day(8).is_none());
        }
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent() {
        let c = coach();
        let first = c.enroll(1).await.unwrap();
        let second = c.enroll(1).await.unwrap();
        assert_eq!(first, second);
        assert!(first.current_course.is_none());
    }

    #[tokio::test]
    async fn test_today_without_course() {
        let c = coach();
        c.enroll(1).await.unwrap();
        assert!(matches!(c.today(1).await, Err(LearningError::NoActiveCourse)));
        assert!(matches!(c.today(99).await, Err(LearningError::NoActiveCourse)));
    }

    #[tokio::test]
    async fn test_unknown_course() {
        let c = coach();
        assert!(matches!(
            c.start_course(1, "python_30").await,
            Err(LearningError::UnknownCourse(id)) if id == "python_30"
        ));
    }

    #[tokio::test]
    async fn test_navigation_flow() {
        let c = coach();
        let first = c.start_course(5, "python_7").await.unwrap();
        assert_eq!(first.day, 1);
        assert!(matches!(c.previous_day(5).await, Err(LearningError::FirstDay)));

        let second = c.next_day(5).await.unwrap();
        assert_eq!(second.day, 2);
        assert!(second.note.is_some());
        c.next_day(5).await.unwrap();

        let back = c.previous_day(5).await.unwrap();
        assert_eq!(back.day, 2);
        assert_eq!(c.today(5).await.unwrap().day, 2);

        // Re-advancing over day 2 must not double count it.
        c.next_day(5).await.unwrap();
        let report = c.progress(5).await.unwrap();
        assert_eq!(report.completed, 2);
        assert_eq!(report.current_day, 3);
        assert_eq!(report.bar, "🟢🟢⚪⚪⚪⚪⚪");
    }

    #[tokio::test]
    async fn test_last_day_and_finish() {
        let c = coach();
        c.start_course(9, "nodejs_7").await.unwrap();
        for _ in 0..6 {
            c.next_day(9).await.unwrap();
        }
        assert!(matches!(c.next_day(9).await, Err(LearningError::LastDay)));

        let report = c.progress(9).await.unwrap();
        assert_eq!(report.completed, 6);
        assert_eq!(report.current_day, 7);

        assert_eq!(c.finish(9).await.unwrap(), "Node.js in 7 days");
        assert!(matches!(c.today(9).await, Err(LearningError::NoActiveCourse)));
    }

    #[tokio::test]
    async fn test_concurrent_next_day_advances_once_each() {
        let c = Arc::new(LearningCoach::new(SlowStore(InMemoryProgressStore::new())));
        c.start_course(3, "python_7").await.unwrap();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let c = c.clone();
                tokio::spawn(async move { c.next_day(3).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let report = c.progress(3).await.unwrap();
        assert_eq!(report.current_day, 7);
        assert_eq!(report.completed, 6);
        assert!(matches!(c.next_day(3).await, Err(LearningError::LastDay)));
    }

    #[tokio::test]
    async fn test_user_locks_are_released() {
        let c = coach();
        c.start_course(1, "python_7").await.unwrap();
        c.next_day(1).await.unwrap();
        c.enroll(2).await.unwrap();
        // One more lock call prunes everything left behind.
        c.today(1).await.unwrap();
        let _guard = c.lock_user(4).await;
        assert_eq!(c.user_locks.lock().unwrap().len(), 1);
    }
}
