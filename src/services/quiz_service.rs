use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::dto::quiz_dto::{ChoiceView, CreateQuizRequest, QuestionView, QuizView};
use crate::error::{Error, Result};
use crate::models::notification::NotificationKind;
use crate::models::quiz::{QuestionType, Quiz};
use crate::services::dispatcher::NotificationEvent;
use crate::services::queue_service::NotificationQueue;

#[derive(Clone)]
pub struct QuizService {
    pool: PgPool,
    queue: NotificationQueue,
}

impl QuizService {
    pub fn new(pool: PgPool, queue: NotificationQueue) -> Self {
        Self { pool, queue }
    }

    /// Creates a quiz with its questions and choices in one transaction,
    /// then explicitly enqueues the new_quiz fan-out. Publishing never
    /// waits for delivery.
    pub async fn create_quiz(&self, req: &CreateQuizRequest, created_by: Uuid) -> Result<Quiz> {
        validate_quiz_shape(req)?;

        let subject = sqlx::query_as::<_, crate::models::catalog::Subject>(
            r#"SELECT * FROM subjects WHERE id = $1"#,
        )
        .bind(req.subject_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Subject not found".to_string()))?;
        if !subject.is_active {
            return Err(Error::BadRequest(
                "Cannot publish to an inactive subject".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let quiz = sqlx::query_as::<_, Quiz>(
            r#"
            INSERT INTO quizzes
                (id, subject_id, title, duration_minutes, passing_percentage, max_attempts,
                 show_correction, is_active, available_from, available_until, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.subject_id)
        .bind(&req.title)
        .bind(req.duration_minutes)
        .bind(req.passing_percentage)
        .bind(req.max_attempts)
        .bind(req.show_correction.unwrap_or(false))
        .bind(req.is_active.unwrap_or(true))
        .bind(req.available_from)
        .bind(req.available_until)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;

        for (q_pos, question) in req.questions.iter().enumerate() {
            let question_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO questions (id, quiz_id, question_type, text, points, position, explanation)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(quiz.id)
            .bind(question.question_type)
            .bind(&question.text)
            .bind(question.points)
            .bind(q_pos as i32)
            .bind(&question.explanation)
            .fetch_one(&mut *tx)
            .await?;

            for (c_pos, choice) in question.choices.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO choices (id, question_id, text, is_correct, position)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(question_id)
                .bind(&choice.text)
                .bind(choice.is_correct)
                .bind(c_pos as i32)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        if quiz.is_active {
            let event = NotificationEvent {
                kind: NotificationKind::NewQuiz,
                subject_id: quiz.subject_id,
                title: "New quiz available".to_string(),
                message: format!("A new quiz \"{}\" is ready for you", quiz.title),
                data: json!({ "quiz_id": quiz.id }),
            };
            if let Err(err) = self.queue.enqueue(&event).await {
                tracing::error!(quiz_id = %quiz.id, error = %err, "failed to enqueue quiz fan-out");
            }
        }

        Ok(quiz)
    }

    /// Student projection: choices without correctness flags or
    /// explanations.
    pub async fn get_quiz_view(&self, quiz_id: Uuid) -> Result<QuizView> {
        let quiz = sqlx::query_as::<_, Quiz>(r#"SELECT * FROM quizzes WHERE id = $1"#)
            .bind(quiz_id)
            .fetch_one(&self.pool)
            .await?;
        if !quiz.is_active {
            return Err(Error::NotFound("Quiz not found".to_string()));
        }

        let engine = crate::services::attempt_service::AttemptEngine::new(self.pool.clone());
        let questions = engine.quiz_questions(quiz_id).await?;
        let total_points: Decimal = questions.iter().map(|q| q.question.points).sum();

        Ok(QuizView {
            id: quiz.id,
            subject_id: quiz.subject_id,
            title: quiz.title,
            duration_minutes: quiz.duration_minutes,
            passing_percentage: quiz.passing_percentage,
            max_attempts: quiz.max_attempts,
            show_correction: quiz.show_correction,
            available_from: quiz.available_from,
            available_until: quiz.available_until,
            total_points,
            questions: questions
                .into_iter()
                .map(|q| QuestionView {
                    id: q.question.id,
                    question_type: q.question.question_type,
                    text: q.question.text,
                    points: q.question.points,
                    position: q.question.position,
                    choices: q
                        .choices
                        .into_iter()
                        .map(|c| ChoiceView {
                            id: c.id,
                            text: c.text,
                            position: c.position,
                        })
                        .collect(),
                })
                .collect(),
        })
    }

    /// Scans for quizzes closing within the lead window and enqueues one
    /// quiz_closing fan-out each. The flag keeps the scan idempotent.
    pub async fn notify_closing_soon(&self, lead_minutes: i64) -> Result<u64> {
        let now = Utc::now();
        let horizon = now + Duration::minutes(lead_minutes);

        let closing = sqlx::query_as::<_, Quiz>(
            r#"
            SELECT * FROM quizzes
            WHERE is_active = TRUE
              AND closing_notified = FALSE
              AND available_until IS NOT NULL
              AND available_until > $1
              AND available_until <= $2
            "#,
        )
        .bind(now)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;

        let mut notified = 0;
        for quiz in closing {
            let event = NotificationEvent {
                kind: NotificationKind::QuizClosing,
                subject_id: quiz.subject_id,
                title: "Quiz closing soon".to_string(),
                message: format!("The quiz \"{}\" closes soon", quiz.title),
                data: json!({
                    "quiz_id": quiz.id,
                    "available_until": quiz.available_until,
                }),
            };
            if let Err(err) = self.queue.enqueue(&event).await {
                tracing::error!(quiz_id = %quiz.id, error = %err, "failed to enqueue closing notice");
                continue;
            }
            sqlx::query(r#"UPDATE quizzes SET closing_notified = TRUE WHERE id = $1"#)
                .bind(quiz.id)
                .execute(&self.pool)
                .await?;
            notified += 1;
        }
        Ok(notified)
    }
}

fn validate_quiz_shape(req: &CreateQuizRequest) -> Result<()> {
    if req.passing_percentage < Decimal::ZERO || req.passing_percentage > Decimal::new(100, 0) {
        return Err(Error::BadRequest(
            "passing_percentage must be between 0 and 100".to_string(),
        ));
    }
    for question in &req.questions {
        if question.points < Decimal::ZERO {
            return Err(Error::BadRequest(
                "question points must not be negative".to_string(),
            ));
        }
        if question.choices.len() < 2 {
            return Err(Error::BadRequest(
                "every question needs at least two choices".to_string(),
            ));
        }
        let correct = question.choices.iter().filter(|c| c.is_correct).count();
        if correct == 0 {
            return Err(Error::BadRequest(
                "every question needs at least one correct choice".to_string(),
            ));
        }
        match question.question_type {
            QuestionType::SingleChoice if correct != 1 => {
                return Err(Error::BadRequest(
                    "single-choice questions need exactly one correct choice".to_string(),
                ));
            }
            QuestionType::TrueFalse if question.choices.len() != 2 || correct != 1 => {
                return Err(Error::BadRequest(
                    "true/false questions need exactly two choices with one correct".to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::quiz_dto::{CreateChoice, CreateQuestion};

    fn base_request(questions: Vec<CreateQuestion>) -> CreateQuizRequest {
        CreateQuizRequest {
            subject_id: Uuid::new_v4(),
            title: "Midterm".into(),
            duration_minutes: 30,
            passing_percentage: Decimal::new(50, 0),
            max_attempts: 2,
            show_correction: None,
            is_active: None,
            available_from: None,
            available_until: None,
            questions,
        }
    }

    fn question(question_type: QuestionType, correct_flags: &[bool]) -> CreateQuestion {
        CreateQuestion {
            question_type,
            text: "q".into(),
            points: Decimal::ONE,
            explanation: None,
            choices: correct_flags
                .iter()
                .map(|&is_correct| CreateChoice {
                    text: "c".into(),
                    is_correct,
                })
                .collect(),
        }
    }

    #[test]
    fn accepts_well_formed_quizzes() {
        let req = base_request(vec![
            question(QuestionType::SingleChoice, &[true, false, false]),
            question(QuestionType::TrueFalse, &[true, false]),
            question(QuestionType::MultiChoice, &[true, true, false]),
        ]);
        assert!(validate_quiz_shape(&req).is_ok());
    }

    #[test]
    fn rejects_questions_without_a_correct_choice() {
        let req = base_request(vec![question(QuestionType::MultiChoice, &[false, false])]);
        assert!(validate_quiz_shape(&req).is_err());
    }

    #[test]
    fn rejects_single_choice_with_several_correct() {
        let req = base_request(vec![question(QuestionType::SingleChoice, &[true, true])]);
        assert!(validate_quiz_shape(&req).is_err());
    }

    #[test]
    fn rejects_out_of_range_passing_percentage() {
        let mut req = base_request(vec![question(QuestionType::TrueFalse, &[true, false])]);
        req.passing_percentage = Decimal::new(101, 0);
        assert!(validate_quiz_shape(&req).is_err());
    }
}
