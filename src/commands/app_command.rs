use crate::storage::repository::filter::{parse_alpha_order, parse_order_direction};
use crate::storage::repository::EnqueueMode;
use std::str::FromStr;

pub const USAGE: &str = "用法:
  queue <template_id|all> [append]
  simulate [template=<id>] [parallelism=<n>] [shuffle] [stats] [once]
  check [all|<alpha_id>]
  submit [<alpha_id>|count=<n>] [order=<col>] [dir=asc|desc]
  fields sync [region] [universe] [delay]
  refresh [from=<date>] [to=<date>] [status=<s>]
  probe [limit=<n>]
  help";

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitTarget {
    One(String),
    Best(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Queue {
        template_id: Option<String>,
        mode: EnqueueMode,
    },
    Simulate {
        template: Option<String>,
        parallelism: Option<usize>,
        shuffle: bool,
        stats: bool,
        once: bool,
    },
    Check {
        alpha_id: Option<String>,
    },
    Submit {
        target: SubmitTarget,
        order: String,
        direction: String,
    },
    FieldsSync {
        region: Option<String>,
        universe: Option<String>,
        delay: Option<i32>,
    },
    Refresh {
        date_from: Option<String>,
        date_to: Option<String>,
        status: Option<String>,
    },
    Probe {
        limit: Option<usize>,
    },
    Help,
}

impl AppCommand {
    /// 是否需要登录平台
    pub fn needs_session(&self) -> bool {
        !matches!(self, AppCommand::Queue { .. } | AppCommand::Help)
    }
}

/// `key=value` 形式的参数
fn option<'a>(arg: &'a str, key: &str) -> Option<&'a str> {
    arg.strip_prefix(key).and_then(|rest| rest.strip_prefix('='))
}

fn number<T: FromStr>(key: &str, raw: &str) -> Result<T, String> {
    raw.parse::<T>()
        .map_err(|_| format!("{} 需要数字，收到 {}", key, raw))
}

impl FromStr for AppCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let Some((&head, rest)) = parts.split_first() else {
            return Ok(AppCommand::Help);
        };

        match head {
            "queue" => {
                let template_id = match rest.first() {
                    Some(&"all") => None,
                    Some(id) => Some(id.to_string()),
                    None => return Err("用法: queue <template_id|all> [append]".to_string()),
                };
                let mode = match rest.get(1) {
                    None => EnqueueMode::Replace,
                    Some(&"append") => EnqueueMode::Append,
                    Some(other) => return Err(format!("未知的 queue 选项: {}", other)),
                };
                Ok(AppCommand::Queue { template_id, mode })
            }
            "simulate" | "sim" => {
                let mut template = None;
                let mut parallelism = None;
                let (mut shuffle, mut stats, mut once) = (false, false, false);
                for arg in rest {
                    if let Some(v) = option(arg, "template") {
                        template = Some(v.to_string());
                    } else if let Some(v) = option(arg, "parallelism") {
                        let n: usize = number("parallelism", v)?;
                        if n == 0 {
                            return Err("parallelism 至少为 1".to_string());
                        }
                        parallelism = Some(n);
                    } else {
                        match *arg {
                            "shuffle" => shuffle = true,
                            "stats" => stats = true,
                            "once" => once = true,
                            other => return Err(format!("未知的 simulate 选项: {}", other)),
                        }
                    }
                }
                Ok(AppCommand::Simulate {
                    template,
                    parallelism,
                    shuffle,
                    stats,
                    once,
                })
            }
            "check" => match rest {
                [] | ["all"] => Ok(AppCommand::Check { alpha_id: None }),
                [id] => Ok(AppCommand::Check {
                    alpha_id: Some(id.to_string()),
                }),
                _ => Err("用法: check [all|<alpha_id>]".to_string()),
            },
            "submit" => {
                let mut target = SubmitTarget::Best(1);
                let mut order = "sharpe".to_string();
                let mut direction = "desc".to_string();
                for arg in rest {
                    if let Some(v) = option(arg, "count") {
                        target = SubmitTarget::Best(number("count", v)?);
                    } else if let Some(v) = option(arg, "order") {
                        parse_alpha_order(v).map_err(|e| e.to_string())?;
                        order = v.to_string();
                    } else if let Some(v) = option(arg, "dir") {
                        parse_order_direction(v).map_err(|e| e.to_string())?;
                        direction = v.to_string();
                    } else if arg.contains('=') {
                        return Err(format!("未知的 submit 选项: {}", arg));
                    } else {
                        target = SubmitTarget::One(arg.to_string());
                    }
                }
                Ok(AppCommand::Submit {
                    target,
                    order,
                    direction,
                })
            }
            "fields" => {
                if rest.first() != Some(&"sync") {
                    return Err("用法: fields sync [region] [universe] [delay]".to_string());
                }
                let delay = match rest.get(3) {
                    Some(v) => Some(number("delay", v)?),
                    None => None,
                };
                Ok(AppCommand::FieldsSync {
                    region: rest.get(1).map(|s| s.to_string()),
                    universe: rest.get(2).map(|s| s.to_string()),
                    delay,
                })
            }
            "refresh" => {
                let (mut date_from, mut date_to, mut status) = (None, None, None);
                for arg in rest {
                    if let Some(v) = option(arg, "from") {
                        date_from = Some(v.to_string());
                    } else if let Some(v) = option(arg, "to") {
                        date_to = Some(v.to_string());
                    } else if let Some(v) = option(arg, "status") {
                        status = Some(v.to_ascii_uppercase());
                    } else {
                        return Err(format!("未知的 refresh 选项: {}", arg));
                    }
                }
                Ok(AppCommand::Refresh {
                    date_from,
                    date_to,
                    status,
                })
            }
            "probe" => {
                let mut limit = None;
                for arg in rest {
                    match option(arg, "limit") {
                        Some(v) => limit = Some(number("limit", v)?),
                        None => return Err(format!("未知的 probe 选项: {}", arg)),
                    }
                }
                Ok(AppCommand::Probe { limit })
            }
            "help" | "h" | "--help" | "-h" => Ok(AppCommand::Help),
            other => Err(format!("未知命令: {}", other)),
        }
    }
}
