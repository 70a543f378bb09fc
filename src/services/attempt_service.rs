use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::dto::attempt_dto::{
    AnswerCorrection, AttemptResultResponse, AttemptSummary, SubmitAnswersRequest,
};
use crate::error::{Error, Result};
use crate::models::attempt::{AttemptStatus, QuizAttempt, StudentAnswer};
use crate::models::quiz::{Choice, Question, QuestionWithChoices, Quiz};
use crate::services::grading::{self, GradedSubmission};

#[derive(Clone)]
pub struct AttemptEngine {
    pool: PgPool,
}

impl AttemptEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_quiz(&self, quiz_id: Uuid) -> Result<Quiz> {
        let quiz = sqlx::query_as::<_, Quiz>(r#"SELECT * FROM quizzes WHERE id = $1"#)
            .bind(quiz_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(quiz)
    }

    pub async fn quiz_questions(&self, quiz_id: Uuid) -> Result<Vec<QuestionWithChoices>> {
        let questions = sqlx::query_as::<_, Question>(
            r#"SELECT * FROM questions WHERE quiz_id = $1 ORDER BY position ASC"#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        let choices = sqlx::query_as::<_, Choice>(
            r#"
            SELECT c.* FROM choices c
            JOIN questions q ON c.question_id = q.id
            WHERE q.quiz_id = $1
            ORDER BY c.position ASC
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: Vec<QuestionWithChoices> = questions
            .into_iter()
            .map(|question| QuestionWithChoices {
                question,
                choices: Vec::new(),
            })
            .collect();
        for choice in choices {
            if let Some(entry) = grouped
                .iter_mut()
                .find(|e| e.question.id == choice.question_id)
            {
                entry.choices.push(choice);
            }
        }
        Ok(grouped)
    }

    /// Creates the next attempt for (user, quiz).
    ///
    /// The count-then-create step runs under a transaction-scoped advisory
    /// lock keyed on the pair, so concurrent starts from the same user get
    /// gapless sequential attempt numbers. The unique index on
    /// (user_id, quiz_id, attempt_number) backstops the lock.
    pub async fn start_attempt(&self, user_id: Uuid, quiz_id: Uuid) -> Result<QuizAttempt> {
        let quiz = self.get_quiz(quiz_id).await?;
        let now = Utc::now();
        if !quiz.is_available_at(now) {
            return Err(Error::QuizNotAvailable(
                "This quiz is not open for attempts".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))"#)
            .bind(user_id.to_string())
            .bind(quiz_id.to_string())
            .execute(&mut *tx)
            .await?;

        let existing: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM quiz_attempts WHERE user_id = $1 AND quiz_id = $2"#,
        )
        .bind(user_id)
        .bind(quiz_id)
        .fetch_one(&mut *tx)
        .await?;

        if existing >= quiz.max_attempts as i64 {
            return Err(Error::AttemptLimitExceeded(quiz.max_attempts));
        }

        let attempt = sqlx::query_as::<_, QuizAttempt>(
            r#"
            INSERT INTO quiz_attempts (id, quiz_id, user_id, attempt_number, status, started_at)
            VALUES ($1, $2, $3, $4, 'in_progress', $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(quiz_id)
        .bind(user_id)
        .bind(existing as i32 + 1)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict("Concurrent attempt creation, retry".to_string())
            }
            _ => Error::from(e),
        })?;

        tx.commit().await?;
        Ok(attempt)
    }

    pub async fn get_owned_attempt(&self, user_id: Uuid, attempt_id: Uuid) -> Result<QuizAttempt> {
        let attempt =
            sqlx::query_as::<_, QuizAttempt>(r#"SELECT * FROM quiz_attempts WHERE id = $1"#)
                .bind(attempt_id)
                .fetch_one(&self.pool)
                .await?;
        if attempt.user_id != user_id {
            return Err(Error::Forbidden(
                "Attempt belongs to another user".to_string(),
            ));
        }
        Ok(attempt)
    }

    /// Grades and completes an in-progress attempt in one transaction.
    ///
    /// The status flip is a conditional update keyed on the current status;
    /// of two concurrent submissions exactly one wins and the other gets a
    /// conflict, never a half-graded attempt.
    pub async fn submit_answers(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
        req: &SubmitAnswersRequest,
    ) -> Result<AttemptResultResponse> {
        let attempt = self.get_owned_attempt(user_id, attempt_id).await?;
        if attempt.status != AttemptStatus::InProgress {
            return Err(Error::InvalidAttemptState(
                "Attempt is not in progress".to_string(),
            ));
        }

        let quiz = self.get_quiz(attempt.quiz_id).await?;
        let questions = self.quiz_questions(attempt.quiz_id).await?;
        let graded = grading::grade_submission(&questions, &req.answers)?;
        let passed = grading::is_passed(graded.score, graded.total_points, quiz.passing_percentage);
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, QuizAttempt>(
            r#"
            UPDATE quiz_attempts
            SET status = 'completed', score = $2, max_score = $3, passed = $4,
                completed_at = $5, updated_at = $5
            WHERE id = $1 AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(attempt_id)
        .bind(graded.score)
        .bind(graded.total_points)
        .bind(passed)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            return Err(Error::InvalidAttemptState(
                "Attempt was completed or abandoned concurrently".to_string(),
            ));
        };

        for answer in &graded.answers {
            sqlx::query(
                r#"
                INSERT INTO student_answers
                    (id, attempt_id, question_id, selected_choice_ids, is_correct, points_earned)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(attempt_id)
            .bind(answer.question_id)
            .bind(&answer.selected_choice_ids)
            .bind(answer.is_correct)
            .bind(answer.points_earned)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(self.project_result(&quiz, &updated, &questions, Some(&graded)))
    }

    /// Explicit in_progress -> abandoned transition. Terminal states are
    /// untouchable, enforced by the same conditional update as submission.
    pub async fn abandon(&self, user_id: Uuid, attempt_id: Uuid) -> Result<QuizAttempt> {
        let _ = self.get_owned_attempt(user_id, attempt_id).await?;
        let now = Utc::now();
        let updated = sqlx::query_as::<_, QuizAttempt>(
            r#"
            UPDATE quiz_attempts
            SET status = 'abandoned', completed_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'in_progress'
            RETURNING *
            "#,
        )
        .bind(attempt_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or_else(|| {
            Error::InvalidAttemptState("Attempt is not in progress".to_string())
        })
    }

    /// Sweep for attempts that outlived their quiz duration plus a grace
    /// period. Runs from a background loop, not from the request path.
    pub async fn abandon_overdue(&self, grace_minutes: i64) -> Result<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE quiz_attempts a
            SET status = 'abandoned', completed_at = $1, updated_at = $1
            FROM quizzes q
            WHERE a.quiz_id = q.id
              AND a.status = 'in_progress'
              AND a.started_at + make_interval(mins => q.duration_minutes + $2) < $1
            "#,
        )
        .bind(now)
        .bind(grace_minutes as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_result(&self, user_id: Uuid, attempt_id: Uuid) -> Result<AttemptResultResponse> {
        let attempt = self.get_owned_attempt(user_id, attempt_id).await?;
        if attempt.status != AttemptStatus::Completed {
            return Err(Error::InvalidAttemptState(
                "Attempt has not been graded".to_string(),
            ));
        }
        let quiz = self.get_quiz(attempt.quiz_id).await?;
        let questions = self.quiz_questions(attempt.quiz_id).await?;
        let answers = sqlx::query_as::<_, StudentAnswer>(
            r#"SELECT * FROM student_answers WHERE attempt_id = $1"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        let graded = GradedSubmission {
            score: attempt.score.unwrap_or_default(),
            total_points: attempt.max_score.unwrap_or_default(),
            answers: answers
                .into_iter()
                .map(|a| crate::services::grading::GradedAnswer {
                    question_id: a.question_id,
                    selected_choice_ids: a.selected_choice_ids,
                    is_correct: a.is_correct,
                    points_earned: a.points_earned,
                })
                .collect(),
        };

        Ok(self.project_result(&quiz, &attempt, &questions, Some(&graded)))
    }

    pub async fn list_attempts(&self, user_id: Uuid, quiz_id: Uuid) -> Result<Vec<AttemptSummary>> {
        let attempts = sqlx::query_as::<_, QuizAttempt>(
            r#"
            SELECT * FROM quiz_attempts
            WHERE user_id = $1 AND quiz_id = $2
            ORDER BY attempt_number ASC
            "#,
        )
        .bind(user_id)
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts
            .into_iter()
            .map(|a| AttemptSummary {
                attempt_id: a.id,
                attempt_number: a.attempt_number,
                status: a.status,
                score: a.score,
                passed: a.passed,
                started_at: a.started_at,
                completed_at: a.completed_at,
            })
            .collect())
    }

    fn project_result(
        &self,
        quiz: &Quiz,
        attempt: &QuizAttempt,
        questions: &[QuestionWithChoices],
        graded: Option<&GradedSubmission>,
    ) -> AttemptResultResponse {
        let score = attempt.score.unwrap_or_default();
        let total_points = attempt.max_score.unwrap_or_default();

        let corrections = match (quiz.show_correction, graded) {
            (true, Some(graded)) => Some(
                graded
                    .answers
                    .iter()
                    .map(|answer| {
                        let question = questions
                            .iter()
                            .find(|q| q.question.id == answer.question_id);
                        AnswerCorrection {
                            question_id: answer.question_id,
                            selected_choice_ids: answer.selected_choice_ids.clone(),
                            correct_choice_ids: question
                                .map(|q| q.correct_choice_ids())
                                .unwrap_or_default(),
                            is_correct: answer.is_correct,
                            points_earned: answer.points_earned,
                            explanation: question
                                .and_then(|q| q.question.explanation.clone()),
                        }
                    })
                    .collect(),
            ),
            _ => None,
        };

        AttemptResultResponse {
            attempt_id: attempt.id,
            quiz_id: attempt.quiz_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            score,
            total_points,
            percentage: grading::percentage(score, total_points).round_dp(2),
            passed: attempt.passed.unwrap_or(false),
            normalized_score: grading::normalized_score(score, total_points),
            normalized_passing_threshold: grading::normalized_passing_threshold(
                quiz.passing_percentage,
            ),
            completed_at: attempt.completed_at,
            corrections,
        }
    }
}
