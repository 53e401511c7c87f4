//! hotaru でデバッグするためのサンプルプログラム
//! 行番号はネイティブ統合テストから参照されるため、変更する場合はテストも合わせて更新すること。

/// 数値と文字列のローカル変数を持つ関数
#[inline(never)]
fn compute(base: i64, label: &str) -> i64 {
    let doubled = base * 2;
    let flag = doubled > 10;
    println!("{}: {} -> {} ({})", label, base, doubled, flag);
    doubled + 1
}

fn main() {
    let rounds: u32 = 3;
    let mut total: i64 = 0;
    for i in 0..rounds {
        total += compute(i as i64 + 4, "round");
    }
    println!("total = {}", total);
}
