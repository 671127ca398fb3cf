use super::csv::command_reader::{CommandOp, CommandRecord};
use crate::application::engine::{LedgerEngine, TopUpResult};
use crate::application::query::{AccountView, PayHistoryQuery, PayOrderView, RedeemCodeFilter};
use crate::error::{LedgerError, RespCode, Result};
use serde::Serialize;
use serde_json::Value;

/// The outcome of one command, printed as a single JSON line.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub line: u64,
    pub op: Option<CommandOp>,
    pub code: RespCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn new(line: u64, op: Option<CommandOp>, result: Result<Value>) -> Self {
        match result {
            Ok(data) => Self {
                line,
                op,
                code: RespCode::Success,
                data: Some(data),
                error: None,
            },
            Err(err) => Self {
                line,
                op,
                code: err.resp_code(),
                data: None,
                error: Some(err.to_string()),
            },
        }
    }
}

fn required<T>(value: Option<T>, column: &str) -> Result<T> {
    value.ok_or_else(|| LedgerError::ValidationError(format!("missing column '{column}'")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(LedgerError::Render)
}

/// Runs one command against the engine and renders its result.
pub async fn dispatch(engine: &LedgerEngine, line: u64, command: CommandRecord) -> Response {
    let op = command.op;
    Response::new(line, Some(op), execute(engine, command).await)
}

async fn execute(engine: &LedgerEngine, command: CommandRecord) -> Result<Value> {
    match command.op {
        CommandOp::Create => {
            let account = engine.create_account(required(command.user, "user")?).await?;
            to_value(&AccountView::from(&account))
        }
        CommandOp::Account => {
            let view = engine
                .get_account(required(command.user, "user")?)
                .await?
                .ok_or(LedgerError::AccountNotExist)?;
            to_value(&view)
        }
        CommandOp::Pay => {
            let user_id = required(command.user, "user")?;
            let biz_id = command.key.unwrap_or_default();
            let amount = required(command.amount, "amount")?;
            let entry = engine.pay(user_id, &biz_id, amount).await?;
            to_value(&PayOrderView::new(&entry, Some(user_id)))
        }
        CommandOp::TopUp => {
            let user_id = required(command.user, "user")?;
            let code = command.key.unwrap_or_default();
            let (account, code) = engine.top_up(user_id, &code).await?;
            to_value(&TopUpResult::new(&account, &code))
        }
        CommandOp::History => {
            let history = engine
                .query_pay_history(&PayHistoryQuery {
                    user_id: command.user,
                    biz_id: command.key,
                    limit: command.count,
                })
                .await?;
            to_value(&history)
        }
        CommandOp::Generate => {
            let amount = required(command.amount, "amount")?;
            let count = required(command.count, "count")?;
            to_value(&engine.generate_redeem_codes(amount, count).await?)
        }
        CommandOp::Codes => {
            let codes = engine
                .query_redeem_codes(&RedeemCodeFilter {
                    code: command.key,
                    used: command.used,
                    limit: command.count,
                })
                .await?;
            to_value(&codes)
        }
    }
}
