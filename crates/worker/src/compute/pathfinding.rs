use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use tabletop_core::{RuntimeError, RuntimeResult};

/// `FIND_PATHS` 请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRequest {
    pub from: usize,
    pub to: usize,
    pub board_size: usize,
    pub max_steps: usize,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub blocked: Vec<usize>,
    /// 双向捷径 `[a, b]`
    #[serde(default)]
    pub shortcuts: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResult {
    /// 按长度升序的简单路径，包含起点和终点
    pub paths: Vec<Vec<usize>>,
    pub explored: usize,
    /// 达到探索上限而提前停止
    pub truncated: bool,
}

struct RingBoard {
    size: usize,
    blocked: HashSet<usize>,
    shortcuts: Vec<(usize, usize)>,
}

impl RingBoard {
    fn neighbours(&self, position: usize) -> BTreeSet<usize> {
        let mut next = BTreeSet::new();
        // position < size，加一不会溢出
        next.insert((position + 1) % self.size);
        next.insert(if position == 0 { self.size - 1 } else { position - 1 });
        for &(a, b) in &self.shortcuts {
            if a == position {
                next.insert(b);
            } else if b == position {
                next.insert(a);
            }
        }
        next.retain(|p| *p != position && !self.blocked.contains(p));
        next
    }
}

/// 在环形棋盘上做有界BFS，返回至多 `top_k` 条最短的简单路径
pub fn find_paths(
    request: &PathRequest,
    max_explored_states: usize,
    default_top_k: usize,
) -> RuntimeResult<PathResult> {
    let size = request.board_size;
    if size == 0 {
        return Err(RuntimeError::invalid_payload("boardSize 必须大于0"));
    }
    if request.from >= size || request.to >= size {
        return Err(RuntimeError::invalid_payload(format!(
            "起点或终点越界: from={}, to={}, boardSize={}",
            request.from, request.to, size
        )));
    }
    if let Some(&(a, b)) = request
        .shortcuts
        .iter()
        .find(|(a, b)| *a >= size || *b >= size)
    {
        return Err(RuntimeError::invalid_payload(format!(
            "捷径越界: [{a}, {b}]"
        )));
    }

    let top_k = request.top_k.unwrap_or(default_top_k);
    let board = RingBoard {
        size,
        blocked: request.blocked.iter().copied().collect(),
        shortcuts: request.shortcuts.clone(),
    };

    let mut result = PathResult {
        paths: Vec::new(),
        explored: 0,
        truncated: false,
    };
    if top_k == 0 || board.blocked.contains(&request.from) {
        return Ok(result);
    }

    let mut queue = VecDeque::new();
    queue.push_back(vec![request.from]);

    while let Some(path) = queue.pop_front() {
        if result.explored >= max_explored_states {
            result.truncated = true;
            break;
        }
        result.explored += 1;

        let Some(&current) = path.last() else {
            continue;
        };
        if current == request.to {
            result.paths.push(path);
            if result.paths.len() >= top_k {
                break;
            }
            continue;
        }
        if path.len() > request.max_steps {
            continue;
        }

        for next in board.neighbours(current) {
            if path.contains(&next) {
                continue;
            }
            let mut extended = path.clone();
            extended.push(next);
            queue.push_back(extended);
        }
    }

    Ok(result)
}
